//! Concurrent HTTP fetcher
//!
//! Submits every URL on the command line to the async request pool at
//! once and reports each reply as it resolves.
//!
//! Usage: http_fetch <url> [url...]

use anyhow::{bail, Result};
use tracing::{info, warn};
use wirepool_runtime::bin_common::{parse_args, BinaryRunner, RunConfig};
use wirepool_runtime::config::RuntimeConfig;
use wirepool_runtime::wirepool::{HttpPool, HttpRequest};

struct Fetcher {
    run: RunConfig,
    urls: Vec<String>,
}

impl BinaryRunner for Fetcher {
    fn run(&mut self, runtime: &RuntimeConfig) -> Result<()> {
        let pool = HttpPool::new(runtime.http.clone())?;

        let mut futures = Vec::with_capacity(self.urls.len());
        for url in &self.urls {
            let request = match HttpRequest::get(url) {
                Ok(request) => request,
                Err(e) => {
                    warn!("Skipping {}: {}", url, e);
                    continue;
                }
            };
            let label = url.clone();
            let future = pool.request_with_callback(request, move |reply| {
                info!("{} resolved with {}", label, reply.status_code)
            });
            futures.push((url.clone(), future));
        }

        if !pool.wait_idle(self.run.run_timeout) {
            warn!("{} requests still pending, cancelling", pool.pending_count());
        }

        let mut failures = self.urls.len() - futures.len();
        for (url, future) in futures {
            if !future.is_ready() {
                pool.cancel(future.id());
            }
            let reply = future.wait();
            if reply.is_failure() {
                failures += 1;
                warn!("{}: {}", url, reply.status_message);
            } else {
                info!(
                    "{}: {} {} ({} bytes, content-type {})",
                    url,
                    reply.status_code,
                    reply.status_message,
                    reply.body.len(),
                    reply.header("content-type").unwrap_or("-")
                );
            }
        }

        pool.shutdown();
        if failures > 0 {
            bail!("{} of {} requests failed", failures, self.urls.len());
        }
        Ok(())
    }

    fn config(&self) -> &RunConfig {
        &self.run
    }
}

fn main() -> Result<()> {
    let args = parse_args()?;
    let urls = args.positional;
    if urls.is_empty() {
        bail!("usage: http_fetch [--config <path>] <url> [url...]");
    }

    let runtime = RuntimeConfig::load(args.config.resolve())?;
    let mut fetcher = Fetcher {
        run: RunConfig::new("http_fetch"),
        urls,
    };
    fetcher.execute(runtime)
}
