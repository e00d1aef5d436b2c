use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use futures::future::join_all;
use itertools::Itertools;
use manifestor::{
    artifacts::{ArtifactManager, ModuleOutput},
    config::Opts,
    error::ModuleErrors,
    input::ModuleInput,
    registry::ModelRegistry,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

async fn inner_main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    let modules = ModuleInput::from_file(&opts.modules)?;
    let duplicates: Vec<_> = modules.iter().map(|m| &m.module).duplicates().collect();
    anyhow::ensure!(
        duplicates.is_empty(),
        "modules declared more than once: {}",
        duplicates.iter().join(", ")
    );
    info!(count = modules.len(), output = %opts.output.display(), "generating artifacts");

    let registry = Arc::new(ModelRegistry::new());
    let settings = opts.build_settings();
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupted, stopping after the current stage");
                cancel.cancel();
            }
        });
    }

    // each module owns its own context and output directories
    let tasks = modules.into_iter().map(|input| {
        let registry = Arc::clone(&registry);
        let settings = settings.clone();
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || {
            ArtifactManager::new(&registry, settings)
                .with_cancellation(cancel)
                .run(&input)
        })
    });
    let results = join_all(tasks).await;

    let mut failed = 0;
    for result in results {
        match result.context("module worker panicked")? {
            Ok(output) => report(&output),
            Err(errors) => {
                failed += 1;
                report_errors(&errors);
            }
        }
    }
    anyhow::ensure!(failed == 0, "{failed} module(s) failed");
    Ok(())
}

fn report(output: &ModuleOutput) {
    println!("module [{}] {}", output.module, output.digest.shorthex());
    for file in &output.files {
        println!("  {}", file.display());
    }
    println!("  build: {}", output.image.command().join(" "));
}

fn report_errors(errors: &ModuleErrors) {
    for e in errors.iter() {
        error!(module = %errors.module, "{e}");
    }
    eprintln!("{errors}");
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = inner_main().await {
        eprintln!("{:?}", e);
        std::process::exit(1);
    }
}
