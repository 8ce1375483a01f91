//! Umbra Daemon - runs closest-nodes lookups on a simulated network.
//!
//! Provides:
//! - Configuration loading from `~/.umbra/config.toml`
//! - A simulated network of DHT nodes over the in-memory transport
//! - Lookups with per-peer distance reporting

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::seq::{index, SliceRandom};
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::signal;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use umbra_core::{Destination, Key};
use umbra_dht::{DhtConfig, DhtService, ListenerRegistry, LookupResult, MemoryNetwork};

/// Umbra daemon.
#[derive(Parser, Debug)]
#[command(name = "umbrad")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Configuration file path
    #[arg(short, long, default_value = "~/.umbra/config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build a simulated network and look up the peers closest to a key
    Lookup {
        /// Number of nodes in the simulated network
        #[arg(short, long, default_value_t = 50)]
        nodes: usize,

        /// Target key as 64 hex characters (random if omitted)
        #[arg(short, long)]
        key: Option<String>,

        /// Number of nodes that never answer
        #[arg(short, long, default_value_t = 0)]
        unresponsive: usize,

        /// Peers each node knows at start
        #[arg(long, default_value_t = 8)]
        peers_per_node: usize,

        /// Seed for topology and candidate picks
        #[arg(long)]
        seed: Option<u64>,

        /// Overrides the configured number of parallel requests
        #[arg(long)]
        alpha: Option<usize>,

        /// Overrides the configured result size
        #[arg(long)]
        result_size: Option<usize>,
    },

    /// Print the effective configuration
    Config,
}

/// `[lookup]` section of the config file.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct LookupSection {
    request_timeout_secs: Option<u64>,
    lookup_timeout_secs: Option<u64>,
    alpha: Option<usize>,
    result_size: Option<usize>,
    tick_interval_ms: Option<u64>,
}

/// `[routing]` section of the config file.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RoutingSection {
    bucket_size: Option<usize>,
    max_stale_count: Option<u32>,
}

/// Config file contents. Every field is optional and overrides a default.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    lookup: LookupSection,
    routing: RoutingSection,
}

impl FileConfig {
    /// Applies the values present in the file on top of `config`.
    fn apply(&self, config: &mut DhtConfig) {
        let lookup = &mut config.lookup;
        if let Some(secs) = self.lookup.request_timeout_secs {
            lookup.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.lookup.lookup_timeout_secs {
            lookup.lookup_timeout = Duration::from_secs(secs);
        }
        if let Some(alpha) = self.lookup.alpha {
            lookup.alpha = alpha;
        }
        if let Some(result_size) = self.lookup.result_size {
            lookup.result_size = result_size;
        }
        if let Some(ms) = self.lookup.tick_interval_ms {
            lookup.tick_interval = Duration::from_millis(ms);
        }

        let routing = &mut config.routing;
        if let Some(bucket_size) = self.routing.bucket_size {
            routing.bucket_size = bucket_size;
        }
        if let Some(max_stale_count) = self.routing.max_stale_count {
            routing.max_stale_count = max_stale_count;
        }
    }

    /// Describes `config` completely, for printing.
    fn from_effective(config: &DhtConfig) -> Self {
        Self {
            lookup: LookupSection {
                request_timeout_secs: Some(config.lookup.request_timeout.as_secs()),
                lookup_timeout_secs: Some(config.lookup.lookup_timeout.as_secs()),
                alpha: Some(config.lookup.alpha),
                result_size: Some(config.lookup.result_size),
                tick_interval_ms: Some(config.lookup.tick_interval.as_millis() as u64),
            },
            routing: RoutingSection {
                bucket_size: Some(config.routing.bucket_size),
                max_stale_count: Some(config.routing.max_stale_count),
            },
        }
    }
}

/// Load configuration from TOML file.
fn load_config(path: &Path) -> Result<DhtConfig> {
    let path = expand_tilde(path);
    let mut config = DhtConfig::default();

    if !path.exists() {
        info!("No config file found at {:?}, using defaults", path);
        return Ok(config);
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let file: FileConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    file.apply(&mut config);

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Expand ~ to home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

/// Parses a target key given on the command line.
fn parse_key(hex_key: &str) -> Result<Key> {
    Key::from_hex(hex_key).with_context(|| format!("Invalid key {:?}", hex_key))
}

/// A node of the simulated network.
struct SimNode {
    destination: Destination,
    service: DhtService,
}

/// Nodes sharing one in-memory network.
struct Simulation {
    network: MemoryNetwork,
    nodes: Vec<SimNode>,
}

impl Simulation {
    /// Creates `count` nodes, each knowing `peers_per_node` random others,
    /// and takes `unresponsive` of them offline. Node 0 always stays online.
    fn build(
        config: &DhtConfig,
        count: usize,
        peers_per_node: usize,
        unresponsive: usize,
        rng: &mut StdRng,
    ) -> Result<Self> {
        anyhow::ensure!(count >= 2, "A simulated network needs at least two nodes");
        anyhow::ensure!(
            unresponsive < count,
            "At most {} of {} nodes can be unresponsive",
            count - 1,
            count
        );

        let network = MemoryNetwork::new();
        let mut nodes = Vec::with_capacity(count);
        for _ in 0..count {
            let destination = Destination::random();
            let registry = Arc::new(ListenerRegistry::new());
            let send_queue = Arc::new(network.attach(destination.clone(), registry.clone()));
            let service = DhtService::new(config.clone(), destination.clone(), send_queue, registry)
                .context("Failed to start DHT service")?;
            nodes.push(SimNode {
                destination,
                service,
            });
        }

        let indices: Vec<usize> = (0..count).collect();
        for (i, node) in nodes.iter().enumerate() {
            let others: Vec<usize> = indices.iter().copied().filter(|&j| j != i).collect();
            for &j in others.choose_multiple(rng, peers_per_node) {
                node.service.add_peer(&nodes[j].destination);
            }
        }

        for offset in index::sample(rng, count - 1, unresponsive) {
            let node = &nodes[offset + 1];
            network.set_online(node.destination.key(), false);
            info!(node = %node.destination, "Node is unresponsive");
        }

        info!(
            nodes = count,
            peers_per_node, unresponsive, "Simulated network ready"
        );
        Ok(Self { network, nodes })
    }

    /// Online nodes other than the requester, closest to `key` first.
    fn true_closest(&self, key: &Key, count: usize) -> Vec<&SimNode> {
        let mut online: Vec<&SimNode> = self.nodes[1..]
            .iter()
            .filter(|node| self.network.is_online(node.destination.key()))
            .collect();
        online.sort_by_key(|node| node.destination.key().distance(key));
        online.truncate(count);
        online
    }
}

/// Runs a lookup from node 0, stopping it early on Ctrl+C.
async fn run_lookup(simulation: &Simulation, key: Key, seed: u64) -> LookupResult {
    let lookup = simulation.nodes[0].service.lookup(key).with_seed(seed);
    let stop = lookup.stop_handle();

    let signal_task = tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Received shutdown signal, stopping lookup");
                stop.stop();
            }
            Err(e) => {
                error!("Failed to listen for shutdown signal: {}", e);
            }
        }
    });

    let result = lookup.run().await;
    signal_task.abort();
    result
}

fn print_result(simulation: &Simulation, result: &LookupResult, result_size: usize) {
    let expected = simulation.true_closest(&result.key, result_size);
    let found_expected = expected
        .iter()
        .filter(|node| result.peers.contains(&node.destination))
        .count();

    println!("Lookup for {}", result.key.to_hex());
    println!("  Termination: {:?}", result.termination);
    println!("  Elapsed: {:.1}s", result.elapsed.as_secs_f64());
    println!(
        "  Found {} peers, {} of the {} closest online",
        result.peers.len(),
        found_expected,
        expected.len()
    );
    println!(
        "  Datagrams delivered: {}, dropped: {}",
        simulation.network.delivered_count(),
        simulation.network.dropped_count()
    );
    println!();

    for (rank, peer) in result.peers.iter().enumerate() {
        let distance = peer.key().distance(&result.key);
        println!(
            "  {:>3}. {} (dest {}..) distance {} ({} leading zero bits)",
            rank + 1,
            peer.key(),
            hex::encode(&peer.as_bytes()[..peer.len().min(8)]),
            distance,
            distance.leading_zeros()
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set up logging")?;

    // Load configuration
    let mut config = load_config(&cli.config)?;

    match cli.command {
        Commands::Lookup {
            nodes,
            key,
            unresponsive,
            peers_per_node,
            seed,
            alpha,
            result_size,
        } => {
            if let Some(alpha) = alpha {
                config.lookup.alpha = alpha;
            }
            if let Some(result_size) = result_size {
                config.lookup.result_size = result_size;
            }
            config.validate().context("Invalid configuration")?;

            let key = match key {
                Some(hex_key) => parse_key(&hex_key)?,
                None => Key::random(),
            };
            let seed = seed.unwrap_or_else(|| rand::thread_rng().gen());
            info!(seed, "Using seed");

            let mut rng = StdRng::seed_from_u64(seed);
            let simulation =
                Simulation::build(&config, nodes, peers_per_node, unresponsive, &mut rng)?;

            let result = run_lookup(&simulation, key, seed).await;
            print_result(&simulation, &result, config.lookup.result_size);
        }

        Commands::Config => {
            let effective = FileConfig::from_effective(&config);
            let rendered =
                toml::to_string_pretty(&effective).context("Failed to render configuration")?;
            println!("{}", rendered);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use umbra_dht::{ConfigError, Termination};

    use super::*;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_expand_tilde() {
        let path = PathBuf::from("~/.umbra/config.toml");
        let expanded = expand_tilde(&path);

        if let Some(home) = dirs::home_dir() {
            assert!(expanded.starts_with(&home));
            assert!(expanded.ends_with(".umbra/config.toml"));
        }

        let absolute = PathBuf::from("/etc/umbra.toml");
        assert_eq!(expand_tilde(&absolute), absolute);
    }

    #[test]
    fn test_missing_config_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, DhtConfig::default());
    }

    #[test]
    fn test_config_file_overrides_defaults() {
        let file = write_config(
            r#"
            [lookup]
            alpha = 5
            tick_interval_ms = 250

            [routing]
            max_stale_count = 3
            "#,
        );
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.lookup.alpha, 5);
        assert_eq!(config.lookup.tick_interval, Duration::from_millis(250));
        assert_eq!(config.routing.max_stale_count, 3);
        // Untouched values keep their defaults
        assert_eq!(config.lookup.result_size, DhtConfig::default().lookup.result_size);
        assert_eq!(config.routing.bucket_size, DhtConfig::default().routing.bucket_size);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let file = write_config("[lookup]\nalpha = 0\n");
        let err = load_config(file.path()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::Zero("alpha"))
        ));
    }

    #[test]
    fn test_unknown_config_key_rejected() {
        let file = write_config("[lookup]\nparallelism = 4\n");
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn test_effective_config_renders_and_reloads() {
        let config = DhtConfig::default();
        let rendered = toml::to_string_pretty(&FileConfig::from_effective(&config)).unwrap();
        let file = write_config(&rendered);
        assert_eq!(load_config(file.path()).unwrap(), config);
    }

    #[test]
    fn test_parse_key() {
        let key = Key::random();
        assert_eq!(parse_key(&key.to_hex()).unwrap(), key);
        assert!(parse_key("abcd").is_err());
        assert!(parse_key(&"zz".repeat(32)).is_err());
    }

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from([
            "umbrad", "-vv", "lookup", "--nodes", "10", "--unresponsive", "2", "--seed", "9",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Lookup {
                nodes,
                unresponsive,
                seed,
                peers_per_node,
                ..
            } => {
                assert_eq!(nodes, 10);
                assert_eq!(unresponsive, 2);
                assert_eq!(seed, Some(9));
                assert_eq!(peers_per_node, 8);
            }
            Commands::Config => panic!("expected lookup command"),
        }
    }

    #[tokio::test]
    async fn test_simulation_rejects_bad_sizes() {
        let config = DhtConfig::default();
        let mut rng = StdRng::seed_from_u64(1);
        assert!(Simulation::build(&config, 1, 4, 0, &mut rng).is_err());
        assert!(Simulation::build(&config, 4, 2, 4, &mut rng).is_err());
    }

    #[tokio::test]
    async fn test_simulated_lookup_finds_peers() {
        let mut config = DhtConfig::default();
        config.lookup.tick_interval = Duration::from_millis(5);
        config.lookup.result_size = 32;
        let mut rng = StdRng::seed_from_u64(3);

        let simulation = Simulation::build(&config, 12, 11, 0, &mut rng).unwrap();
        let key = Key::random();
        let result = run_lookup(&simulation, key, 3).await;

        assert_eq!(result.termination, Termination::Exhausted);
        let expected: Vec<Destination> = simulation
            .true_closest(&key, 32)
            .into_iter()
            .map(|node| node.destination.clone())
            .collect();
        assert_eq!(result.peers, expected);
    }
}
