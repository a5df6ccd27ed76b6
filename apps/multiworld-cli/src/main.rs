use clap::{Parser, Subcommand};
use multiworld_manager::{ManagerConfig, WorldManager};
use multiworld_persist::{DiskDb, DiskProvider, Provider, WorldDb};
use multiworld_session::{PlayerList, SessionRegistry};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "multiworld-cli", about = "CLI tool for multiworld operations")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// YAML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the worlds directory from the config
    #[arg(long)]
    worlds_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version and effective configuration
    Info,
    /// List worlds stored under the worlds directory
    List,
    /// Show the stored settings of a world without loading it
    Inspect {
        /// World name
        name: String,
    },
    /// Delete a world from disk
    Delete {
        /// World name
        name: String,
    },
    /// Load worlds, join participants, unload and report where everyone ended up
    Demo {
        /// Worlds to load
        #[arg(short, long, num_args = 1.., default_values = ["alpha", "beta"])]
        worlds: Vec<String>,
        /// Participants to join into each world
        #[arg(short, long, default_value = "2")]
        players: usize,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    let mut config = match &cli.config {
        Some(path) => ManagerConfig::load(path)?,
        None => ManagerConfig::default(),
    };
    if let Some(dir) = cli.worlds_dir {
        config.worlds_dir = dir;
    }

    let provider = Arc::new(DiskProvider::new());

    match cli.command {
        Commands::Info => {
            println!("multiworld-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("worlds dir: {}", config.worlds_dir.display());
            println!("primary dir: {}", config.primary_dir.display());
            println!("compression: {:?}", config.compression);
            println!("spawn: {}", config.spawn);
            println!("frozen time: {}", config.time);
        }
        Commands::List => {
            let primary = WorldManager::open_primary(provider.as_ref(), &config)?;
            let manager = WorldManager::new(
                Arc::clone(&primary),
                provider,
                Arc::new(PlayerList::new()),
                config,
            );
            let names = manager.available()?;
            if names.is_empty() {
                println!("no worlds in {}", manager.config().worlds_dir.display());
            }
            for name in names {
                println!("{name}");
            }
            primary.close()?;
        }
        Commands::Inspect { name } => {
            let path = config.world_path(&name);
            if !provider.list(&config.worlds_dir)?.contains(&name) {
                anyhow::bail!("no world named {name:?} in {}", config.worlds_dir.display());
            }
            let mut db = DiskDb::open(&path, config.compression)?;
            println!("path: {}", path.display());
            println!("schema: v{}", db.meta().schema_version);
            println!("compression: {:?}", db.meta().compression);
            match db.settings() {
                Some(settings) => {
                    println!("name: {}", settings.name);
                    println!("spawn: {}", settings.spawn);
                }
                None => println!("settings: <none>"),
            }
            db.close()?;
        }
        Commands::Delete { name } => {
            let primary = WorldManager::open_primary(provider.as_ref(), &config)?;
            let manager = WorldManager::new(
                Arc::clone(&primary),
                provider,
                Arc::new(PlayerList::new()),
                config,
            );
            manager.delete(&name)?;
            println!("deleted {name}");
            primary.close()?;
        }
        Commands::Demo { worlds, players } => {
            run_demo(provider, config, &worlds, players)?;
        }
    }

    Ok(())
}

fn run_demo(
    provider: Arc<DiskProvider>,
    config: ManagerConfig,
    worlds: &[String],
    per_world: usize,
) -> anyhow::Result<()> {
    let sessions = Arc::new(PlayerList::new());
    let primary = WorldManager::open_primary(provider.as_ref(), &config)?;
    let manager = WorldManager::new(Arc::clone(&primary), provider, sessions.clone(), config);

    for name in worlds {
        let world = manager.load(name)?;
        for i in 0..per_world {
            sessions.join(format!("{name}-{i}"), &world, world.spawn_center())?;
        }
        println!(
            "Loaded {name}: spawn={}, time={}, entities={}",
            world.spawn(),
            world.time(),
            world.entity_count()
        );
    }
    println!("Loaded worlds: {}", manager.loaded_names().join(", "));

    for name in worlds {
        if let Some(world) = manager.get(name) {
            manager.unload(&world)?;
            println!("Unloaded {name}");
        }
    }

    println!("Participants after unload:");
    for participant in sessions.participants() {
        let world = participant
            .world()
            .map_or_else(|| "<gone>".to_owned(), |w| w.name().to_owned());
        let pos = participant.position();
        println!(
            "  {}: world={world} pos=({:.1}, {:.1}, {:.1})",
            participant.name(),
            pos.x,
            pos.y,
            pos.z
        );
    }
    println!(
        "Primary {}: entities={}",
        primary.name(),
        primary.entity_count()
    );

    manager.close_all()?;
    primary.close()?;
    Ok(())
}
