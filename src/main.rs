use std::{process, sync::Arc, time::Instant};

use futures::future::join_all;
use herdcache::{
    cache::{CacheConfig, CacheRequest, ColdStore, FsColdStore, ResponseCache},
    config::{self, Command, FetchArgs, Settings},
    error::AppError,
    fetch::{OriginClient, cache_key},
    telemetry,
};
use reqwest::Url;
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    telemetry::init(&settings.logging)?;

    match cli_args.command {
        Command::Fetch(args) => run_fetch(settings, args).await,
    }
}

async fn run_fetch(settings: Settings, args: FetchArgs) -> Result<(), AppError> {
    let urls = args
        .urls
        .iter()
        .map(|raw| Url::parse(raw))
        .collect::<Result<Vec<_>, _>>()?;

    let cache = build_cache(&settings).await?;
    let origin = OriginClient::new(&settings.origin)?;
    let request = CacheRequest::get();

    for round in 1..=args.repeat {
        for url in &urls {
            let key = cache_key(url);
            let started = Instant::now();
            let lookups = (0..args.concurrency).map(|_| {
                let fetcher = origin.fetcher(url.clone(), &request);
                let cache = cache.clone();
                let key = key.clone();
                let request = request.clone();
                async move { cache.get_cached(&key, &request, fetcher).await }
            });

            for outcome in join_all(lookups).await {
                let response = outcome?;
                println!(
                    "{round}\t{status}\t{cache}\t{bytes}\t{elapsed_ms}ms\t{key}",
                    status = response.status,
                    cache = response.cache_status().unwrap_or("-"),
                    bytes = response.body.len(),
                    elapsed_ms = started.elapsed().as_millis(),
                );
            }
        }
    }

    if args.dump {
        let written = cache.dump().await;
        info!(written, "Dumped hot tier to cold store");
    } else {
        cache.flush().await;
    }

    Ok(())
}

async fn build_cache(settings: &Settings) -> Result<ResponseCache, AppError> {
    let mut builder = ResponseCache::builder(CacheConfig::from(&settings.cache));
    if let Some(directory) = settings.cold.directory.as_ref() {
        let cold = FsColdStore::open(directory.clone()).await?;
        info!(directory = %directory.display(), "Cold tier enabled");
        builder = builder.cold_store(Arc::new(cold) as Arc<dyn ColdStore>);
    }
    Ok(builder.build())
}
