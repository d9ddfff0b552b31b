//! layerflow demo entry point
//!
//! Builds an in-memory layer list, records a small threshold/count
//! pipeline, edits the source image and lets the background scheduler
//! bring the derived layers up to date.

use anyhow::Result;
use clap::Parser;
use layerflow::introspect;
use layerflow::{
    Array, EngineConfig, Function, LayerList, SessionId, SessionRegistry, Signature, Value,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(name = "layerflow", version, about = "Incremental layer workflow demo")]
struct Cli {
    /// YAML config file (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the tick interval in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Scheduler ticks to wait for after the edit
    #[arg(long, default_value_t = 3)]
    ticks: u32,

    /// Print the graph snapshot as JSON instead of text
    #[arg(long)]
    json: bool,
}

fn threshold() -> Function {
    Function::new(
        "threshold",
        Signature::new().param("image").param_with_default("level", 128),
        |args| {
            let image = args[0]
                .as_array()
                .ok_or_else(|| anyhow::anyhow!("threshold needs an image"))?;
            let level = args[1].as_float().unwrap_or(128.0);
            Ok(Value::Array(image.map(|v| if v > level { 1.0 } else { 0.0 })))
        },
    )
}

fn count() -> Function {
    Function::new("count", Signature::new().param("mask"), |args| {
        let mask = args[0]
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("count needs a mask"))?;
        Ok(Value::Int(mask.data().iter().filter(|v| **v != 0.0).count() as i64))
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("layerflow v{}", env!("CARGO_PKG_VERSION"));

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load_from(path)?,
        None => EngineConfig::load()?,
    };
    if let Some(ms) = cli.interval_ms {
        config.tick_interval_ms = ms;
    }
    config.validate()?;

    let layers = Arc::new(LayerList::with_config(&config));
    let registry = SessionRegistry::new(config.clone());
    let id = SessionId::new("demo-viewer");
    let session = registry.install(id.clone(), layers.clone());
    registry.start(&id, layers.subscribe())?;

    let image = Array::new(vec![2, 3], vec![12.0, 140.0, 90.0, 250.0, 128.0, 200.0])?;
    layers.insert("image", image.clone());

    session.apply("mask", threshold(), vec![image.into(), id.clone().into()])?;
    let mask = layers_value(&layers, "mask")?;
    session.apply("mask count", count(), vec![mask.into()])?;
    log::info!("Initial count: {}", layers_value(&layers, "mask count")?);

    // Let the event pump see the insertions before the user edits
    tokio::time::sleep(config.tick_interval()).await;
    layers.edit(
        "image",
        Array::new(vec![2, 3], vec![255.0, 255.0, 255.0, 0.0, 0.0, 255.0])?,
    )?;
    tokio::time::sleep(config.tick_interval() * (cli.ticks + 1)).await;
    log::info!("Count after edit: {}", layers_value(&layers, "mask count")?);

    if cli.json {
        println!("{}", introspect::snapshot(&session).to_json());
    } else {
        let workflow = session.workflow();
        println!("{}", workflow);
        println!("From source:\n{}", introspect::tree_from_roots(&workflow, layers.as_ref()));
        println!("From target:\n{}", introspect::tree_from_leaves(&workflow, layers.as_ref()));
        println!("Code:\n{}", introspect::generate_code(&workflow));
    }

    registry.close(&id).await;
    Ok(())
}

fn layers_value(layers: &LayerList, name: &str) -> Result<Value> {
    use layerflow::Collection;
    layers
        .get(name)
        .ok_or_else(|| anyhow::anyhow!("layer {} missing", name))
}
