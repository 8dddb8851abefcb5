use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use quicktiles::icon::{IconCallback, IconReply};
use quicktiles::orchestrator::{WidgetHost, WidgetView};
use quicktiles::{
    FileStore, IconBackend, IconService, Orientation, RowDataSource, Rgba, Tile, TileStore,
    WidgetConfig, WidgetHandle, WidgetId, WidgetInstance, WidgetSize,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "quicktiles", about = "Inspect and edit quick tiles widget data")]
struct Cli {
    /// Preferences file holding the tile list
    #[arg(long, default_value = "quicktiles.json")]
    store: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print stored tiles
    List,
    /// Append a tile
    Add { title: String, url: String },
    /// Remove every tile with this URL
    Remove { url: String },
    /// Remove all tiles
    Clear,
    /// Simulate one widget instance and print its rows
    Render {
        /// Reported widget height in dp
        #[arg(long, default_value_t = 200)]
        height: u32,
        #[arg(long)]
        landscape: bool,
    },
}

/// Offline stand-in for the favicon service: every URL gets a monogram
/// color derived from its host.
struct MonogramOnlyService;

impl IconService for MonogramOnlyService {
    fn lookup(&mut self, url: &url::Url, _size_px: u32, reply: IconCallback) {
        let host = url.host_str().unwrap_or_default();
        let h = host.bytes().fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
        reply(IconReply::FallbackColor(Rgba::opaque(
            (h >> 16) as u8,
            (h >> 8) as u8,
            h as u8,
        )));
    }
}

struct MonogramOnlyBackend;

impl IconBackend for MonogramOnlyBackend {
    fn create_service(&self) -> quicktiles::Result<Box<dyn IconService>> {
        Ok(Box::new(MonogramOnlyService))
    }
}

struct PrintHost;

impl WidgetHost for PrintHost {
    fn render(&self, view: &WidgetView) {
        println!(
            "{}: {:?}, {:?} layout, {} tile(s)",
            view.id, view.mode, view.layout, view.tile_count
        );
    }

    fn notify_data_changed(&self, id: WidgetId) {
        log::debug!("{} data changed", id);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let config = WidgetConfig::default();
    let kv = Arc::new(FileStore::new(&cli.store));
    let store = TileStore::new(kv.clone(), &config.storage_key);

    match cli.command {
        Command::List => {
            let tiles = store
                .try_read()
                .with_context(|| format!("reading {}", cli.store.display()))?;
            for (i, t) in tiles.iter().enumerate() {
                println!("{:>2}. {} <{}>", i + 1, t.title, t.url);
            }
        }
        Command::Add { title, url } => {
            let mut tiles = store.read();
            tiles.push(Tile::new(title, url));
            store.write(&tiles)?;
        }
        Command::Remove { url } => {
            let target = Tile::new("", url);
            let mut tiles = store.read();
            let before = tiles.len();
            tiles.retain(|t| *t != target);
            store.write(&tiles)?;
            println!("removed {} tile(s)", before - tiles.len());
        }
        Command::Clear => store.clear()?,
        Command::Render { height, landscape } => {
            let handle = WidgetHandle::start(
                config,
                kv,
                Arc::new(MonogramOnlyBackend),
                Arc::new(PrintHost),
            )?;
            let id = WidgetId(1);
            let instance = WidgetInstance {
                id,
                size: WidgetSize::fixed(320, height),
                orientation: if landscape {
                    Orientation::Landscape
                } else {
                    Orientation::Portrait
                },
            };
            handle.engine_ready().await?;
            handle.widget_placed(instance).await?;

            if let Some(adapter) = handle.adapter(id).await? {
                // Row requests block on icon lookups; keep them off the runtime
                let rows = tokio::task::spawn_blocking(move || {
                    (0..adapter.count())
                        .map(|i| (adapter.item_id(i), adapter.view_at(i)))
                        .collect::<Vec<_>>()
                })
                .await?;
                for (item_id, row) in rows {
                    let letter = row
                        .icon
                        .as_ref()
                        .and_then(|b| b.monogram.as_ref())
                        .map(|m| m.letter)
                        .unwrap_or(' ');
                    println!("  [{}] {:<24} {:016x}", letter, row.title, item_id);
                }
            }
            handle.close().await?;
        }
    }
    Ok(())
}
