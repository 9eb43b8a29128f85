use std::env;
use std::sync::Arc;

use bytes::Bytes;
use dotenvy::dotenv;
use media_upload_scheduler::infrastructure::storage::setup_storage;
use media_upload_scheduler::{
    EnqueueOptions, MediaKind, Sha256Fingerprinter, StorageConfig, UploadConfig, UploadOutcome,
    UploadScheduler,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "media_upload_scheduler=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        println!("Usage: dedup_check <file> [copies]");
        return Ok(());
    }

    let path = &args[1];
    let copies: usize = args
        .get(2)
        .and_then(|v| v.parse().ok())
        .unwrap_or(3);

    let storage = setup_storage(&StorageConfig::from_env()?);
    let scheduler = UploadScheduler::new(
        UploadConfig::from_env(),
        Arc::new(Sha256Fingerprinter),
        storage,
    );

    let data = Bytes::from(tokio::fs::read(path).await?);
    info!("🚀 Enqueuing {} copies of {} ({} bytes)", copies, path, data.len());

    let mut tickets = Vec::new();
    for n in 0..copies {
        let ticket = scheduler.enqueue(
            data.clone(),
            MediaKind::Image,
            EnqueueOptions {
                file_name: Some(format!("copy-{}-{}", n, path)),
                ..Default::default()
            },
        )?;
        tickets.push(ticket);
    }

    let mut keys = Vec::new();
    for ticket in tickets {
        let task_id = ticket.task_id().to_string();
        match ticket.wait().await? {
            UploadOutcome::Stored(stored) => {
                println!(
                    "Task {}: key={} url={} from_cache={}",
                    task_id, stored.object_key, stored.url, stored.from_cache
                );
                keys.push(stored.object_key);
            }
            UploadOutcome::Canceled => println!("Task {}: canceled", task_id),
        }
    }

    keys.dedup();
    if keys.len() == 1 {
        println!("SUCCESS: all copies share object key {}", keys[0]);
    } else {
        println!("FAIL: expected one object key, got {:?}", keys);
        std::process::exit(1);
    }

    // A fresh enqueue of the same bytes must short-circuit through the cache.
    let cached = scheduler
        .enqueue(data, MediaKind::Image, EnqueueOptions::default())?
        .wait()
        .await?;
    match cached {
        UploadOutcome::Stored(stored) if stored.from_cache => {
            println!("SUCCESS: repeat enqueue was served from cache");
        }
        other => {
            println!("FAIL: repeat enqueue was not cached: {:?}", other);
            std::process::exit(1);
        }
    }

    Ok(())
}
