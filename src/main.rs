use std::path::PathBuf;

use clap::Parser;
use eframe::egui;

use story_loom::api;
use story_loom::gui::frontend::StoryApp;
use story_loom::persistence::gateway::SharedStore;
use story_loom::persistence::settings::AppSettings;
use story_loom::persistence::store::StoryStore;

#[derive(Parser, Debug)]
#[command(name = "Story-Loom", version, about = "Author and play branching text games")]
struct Cli {
    /// Serve the JSON API in the foreground instead of opening the window
    #[arg(long)]
    serve: bool,
    #[arg(long)]
    bind: Option<String>,
    #[arg(long)]
    port: Option<u16>,
    /// Directory holding stories.ron
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut settings = AppSettings::load().unwrap_or_else(|e| {
        log::warn!("settings unreadable, using defaults: {}", e);
        AppSettings::default()
    });
    if let Some(bind) = cli.bind {
        settings.api_bind_addr = bind;
    }
    if let Some(port) = cli.port {
        settings.api_port = port;
    }
    if let Some(dir) = cli.data_dir {
        settings.data_override = Some(dir);
    }

    let store = SharedStore::new(StoryStore::open(&settings.store_path())?);
    if cli.serve {
        return api::server::run_blocking(&settings, store);
    }

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1300.0, 760.0])
            .with_min_inner_size([700.0, 420.0])
            .with_resizable(true),
        ..Default::default()
    };
    eframe::run_native(
        "Story-Loom",
        options,
        Box::new(move |_cc| Ok(Box::new(StoryApp::new(settings, store)) as Box<dyn eframe::App>)),
    )
    .map_err(|e| anyhow::anyhow!("window closed with error: {}", e))
}
