mod admin;
mod app;
mod bridge;
mod key;
mod metrics;
mod util;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use evcore::{CallbackCode, Continuation, DispatchResult, Event, ProxyMutex};
use log::info;
use pingora::server::configuration::{Opt, ServerConf};
use pingora::server::Server;
use pingora::services::listening::Service;
use rustix::fd::AsFd;
use rustix::fs::{Mode, OFlags};

use cachecore::{CacheProcessor, Config, RamCacheAlgorithm, Stripe};
use diskaio::{FaultInjector, ThreadPoolAio};

use app::CacheApp;
use util::setup_logs;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Backing file for one stripe. Repeat once per stripe.
    #[arg(long = "stripe", required = true)]
    stripes: Vec<PathBuf>,

    /// Size to create each `--stripe` file at if it doesn't already exist.
    #[arg(long, default_value_t = 1u64 << 30)]
    stripe_size: u64,

    #[arg(long)]
    tcp: Option<String>,

    #[arg(long)]
    uds: Option<String>,

    #[arg(long)]
    admin_tcp: Option<String>,

    #[arg(long)]
    admin_uds: Option<String>,

    #[arg(long)]
    prom: Option<String>,

    #[arg(long, default_value_t = 2)]
    threads_per_disk: usize,

    #[arg(long, default_value_t = 64u64 << 20)]
    ram_cache_size: u64,

    #[arg(long, default_value = "clfus")]
    ram_cache_algorithm: String,

    #[arg(long, default_value_t = 30)]
    sync_interval_secs: u64,
}

fn parse_ram_cache_algorithm(s: &str) -> RamCacheAlgorithm {
    match s {
        "lru" => RamCacheAlgorithm::Lru,
        "sharded_lru" => RamCacheAlgorithm::ShardedLru,
        _ => RamCacheAlgorithm::Clfus,
    }
}

fn build_ram_cache(algorithm: RamCacheAlgorithm, capacity_bytes: u64) -> Box<dyn cachecore::RamCache> {
    match algorithm {
        RamCacheAlgorithm::Lru => Box::new(cachecore::LruRamCache::new(capacity_bytes)),
        RamCacheAlgorithm::Clfus => Box::new(cachecore::ClfusRamCache::new(capacity_bytes)),
        RamCacheAlgorithm::ShardedLru => {
            Box::new(cachecore::ShardedLruRamCache::new(capacity_bytes, 8))
        }
    }
}

fn open_or_create_stripe_file(
    fault_injector: &FaultInjector,
    path: &std::path::Path,
    size: u64,
) -> rustix::fd::OwnedFd {
    if !path.exists() {
        let f = std::fs::File::create(path).expect("failed to create stripe file");
        f.set_len(size).expect("failed to size stripe file");
    }
    fault_injector
        .open(path, OFlags::RDWR, Mode::empty())
        .expect("failed to open stripe file")
}

/// Periodically flushes every stripe's header to its redundant footer
/// locations. Holds no lock of its own beyond the `ProxyMutex` every
/// `Continuation` carries.
struct HeaderSync {
    mutex: Arc<ProxyMutex>,
    stripes: Vec<Arc<Stripe>>,
}

impl Continuation for HeaderSync {
    fn mutex(&self) -> &Arc<ProxyMutex> {
        &self.mutex
    }

    fn handle(&self, _event: &Event) -> DispatchResult {
        for stripe in &self.stripes {
            stripe.sync_header(bridge::discard());
            metrics::CYCLE_SERIAL.set(stripe.header_snapshot().cycle_serial as i64);
        }
        let degraded = self.stripes.iter().filter(|s| s.is_degraded()).count();
        metrics::STRIPES_DEGRADED.set(degraded as i64);
        DispatchResult::Continue
    }
}

fn main() {
    setup_logs();
    let args = Args::parse();

    if args.tcp.is_none() && args.uds.is_none() {
        eprintln!("--tcp or --uds must be provided");
        std::process::exit(1);
    }

    let config = Config {
        threads_per_disk: args.threads_per_disk,
        ram_cache_size: args.ram_cache_size,
        ram_cache_algorithm: parse_ram_cache_algorithm(&args.ram_cache_algorithm),
        ..Config::default()
    };

    let fault_injector = Arc::new(FaultInjector::new());
    let n_aio_threads = (config.threads_per_disk * args.stripes.len()).max(1);
    let aio: Arc<dyn diskaio::AioBackend> =
        Arc::new(ThreadPoolAio::spawn(n_aio_threads, Some(fault_injector.clone())));

    let ram_cache_per_stripe = config.ram_cache_size / args.stripes.len().max(1) as u64;

    let mut stripes = Vec::new();
    let mut weights = Vec::new();
    for (i, path) in args.stripes.iter().enumerate() {
        let fd = open_or_create_stripe_file(&fault_injector, path, args.stripe_size);
        let size = rustix::fs::fstat(fd.as_fd()).expect("fstat failed").st_size as u64;
        let ram_cache = build_ram_cache(config.ram_cache_algorithm, ram_cache_per_stripe);
        let stripe = Arc::new(Stripe::new(
            i as u64,
            Arc::new(fd),
            0,
            size,
            aio.clone(),
            1 << 16,
            1024,
            config.target_fragment_size,
            config.agg_write_backlog,
            ram_cache,
            4,
        ));
        weights.push(size);
        stripes.push(stripe);
    }

    info!("opened {} stripe(s)", stripes.len());

    let processor = Arc::new(CacheProcessor::with_weights(stripes.clone(), weights));

    let sync_processor = evthread::EventProcessor::spawn("CACHE-SYNC", 1, None)
        .expect("failed to spawn header-sync thread");
    let sync_handle = sync_processor.next_handle();
    let sync_cont: Arc<dyn Continuation> = Arc::new(HeaderSync {
        mutex: ProxyMutex::new(),
        stripes: stripes.clone(),
    });
    sync_handle.schedule_every(
        sync_cont,
        CallbackCode::TimerFired,
        Duration::from_secs(args.sync_interval_secs),
    );

    let opt = Some(Opt {
        upgrade: false,
        daemon: false,
        nocapture: false,
        test: false,
        conf: None,
    });
    let conf = ServerConf::default();
    let mut my_server = Server::new_with_opt_and_conf(opt, conf);
    my_server.bootstrap();

    let cache_app = CacheApp::new(processor);
    let mut cache_service_http = Service::new("Cache Engine".to_string(), cache_app);
    if let Some(addr) = &args.tcp {
        info!("listening on tcp {}", addr);
        cache_service_http.add_tcp(addr);
    }
    if let Some(addr) = &args.uds {
        info!("listening on uds {}", addr);
        cache_service_http.add_uds(addr, None);
    }
    my_server.add_service(cache_service_http);

    if args.admin_tcp.is_some() || args.admin_uds.is_some() {
        let admin_app = admin::Admin::new(fault_injector.clone());
        let mut admin_service_http = Service::new("Cache Admin".to_string(), admin_app);
        if let Some(addr) = &args.admin_tcp {
            admin_service_http.add_tcp(addr);
        }
        if let Some(addr) = &args.admin_uds {
            admin_service_http.add_uds(addr, None);
        }
        my_server.add_service(admin_service_http);
    }

    if let Some(addr) = &args.prom {
        let mut prometheus_service_http = Service::prometheus_http_service();
        prometheus_service_http.add_tcp(addr);
        my_server.add_service(prometheus_service_http);
    }

    // sync_processor/sync_handle stay alive in this scope for the rest of
    // the process's life; run_forever below never returns normally.
    my_server.run_forever();
}
