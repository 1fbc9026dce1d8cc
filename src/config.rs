//! Runtime configuration (spec §4.K): everything is driven by
//! environment variables, matching
//! `examples/original_source/src/hcpp-runtime.cpp`'s `crt_entrypoint` /
//! `display_runtime` exactly down to the variable names and the
//! CRT_WORKERS-unset warning text.

use std::env;
use std::fmt;

use crate::errors::Result;

pub const ENV_WORKERS: &str = "CRT_WORKERS";
pub const ENV_HPT_FILE: &str = "CRT_HPT_FILE";
pub const ENV_BIND_THREADS: &str = "CRT_BIND_THREADS";
pub const ENV_STATS: &str = "CRT_STATS";
pub const ENV_MM_ALLOC_BATCH_SIZE: &str = "CRT_MM_ALLOCBATCHSIZE";

const DEFAULT_WORKERS: usize = 1;
const DEFAULT_ALLOC_BATCH_SIZE: usize = 1024;

#[derive(Debug, Clone)]
pub struct Config {
    pub workers: usize,
    pub hpt_file: Option<String>,
    pub bind_threads: bool,
    pub stats: bool,
    pub alloc_batch_size: usize,
}

impl Config {
    /// Reads the five `CRT_*` variables from the process environment.
    /// `CRT_WORKERS` unset is a warning, not an error (matching the
    /// original), and falls back to a single worker; a present-but-empty
    /// or non-numeric value is a hard error since the original's `atoi`
    /// silently producing `0` would trip the `workers > 0` assertion.
    pub fn from_env() -> Result<Self> {
        let hpt_file = env::var(ENV_HPT_FILE).ok();

        let workers = match env::var(ENV_WORKERS) {
            Ok(value) => value
                .parse::<usize>()
                .map_err(|_| err_format!("{} must be a positive integer, got {:?}", ENV_WORKERS, value))
                .and_then(|n| {
                    if n > 0 {
                        Ok(n)
                    } else {
                        Err(err_format!("{} must be a positive integer, got {}", ENV_WORKERS, n))
                    }
                })?,
            Err(_) => {
                if hpt_file.is_none() {
                    log::warn!(
                        "{} not set; please set using env {}. Defaulting to {} worker(s)",
                        ENV_WORKERS,
                        ENV_WORKERS,
                        DEFAULT_WORKERS
                    );
                }
                DEFAULT_WORKERS
            }
        };

        let bind_threads = env::var(ENV_BIND_THREADS).is_ok();
        if env::var(ENV_WORKERS).is_ok() && bind_threads {
            log::warn!(
                "{} assigns cores in round robin; on a multi-socket node this can pack \
                 every place onto the same socket",
                ENV_BIND_THREADS
            );
        }

        let stats = env::var(ENV_STATS).is_ok();

        let alloc_batch_size = match env::var(ENV_MM_ALLOC_BATCH_SIZE) {
            Ok(value) => value
                .parse::<usize>()
                .map_err(|_| err_format!("{} must be a positive integer, got {:?}", ENV_MM_ALLOC_BATCH_SIZE, value))?,
            Err(_) => DEFAULT_ALLOC_BATCH_SIZE,
        };

        let config = Config {
            workers,
            hpt_file,
            bind_threads,
            stats,
            alloc_batch_size,
        };

        if config.stats {
            log::info!("{}", config.display());
        }

        Ok(config)
    }

    fn display(&self) -> RuntimeInfo<'_> {
        RuntimeInfo(self)
    }
}

struct RuntimeInfo<'a>(&'a Config);

impl<'a> fmt::Display for RuntimeInfo<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "---------CRT_RUNTIME_INFO-----------")?;
        writeln!(f, ">>> {}\t\t= {}", ENV_WORKERS, self.0.workers)?;
        writeln!(
            f,
            ">>> {}\t= {}",
            ENV_HPT_FILE,
            self.0.hpt_file.as_deref().unwrap_or("(unset)")
        )?;
        writeln!(f, ">>> {}\t= {}", ENV_BIND_THREADS, self.0.bind_threads)?;
        writeln!(f, ">>> {}\t\t= {}", ENV_STATS, self.0.stats)?;
        write!(f, "----------------------------------------")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global; serialize tests that
    // touch them so they don't race each other.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_to_one_worker_when_unset() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::remove_var(ENV_WORKERS);
        env::remove_var(ENV_HPT_FILE);
        let config = Config::from_env().unwrap();
        assert_eq!(config.workers, 1);
        assert!(!config.bind_threads);
    }

    #[test]
    fn parses_worker_count() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var(ENV_WORKERS, "8");
        let config = Config::from_env().unwrap();
        assert_eq!(config.workers, 8);
        env::remove_var(ENV_WORKERS);
    }

    #[test]
    fn rejects_non_numeric_worker_count() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var(ENV_WORKERS, "banana");
        assert!(Config::from_env().is_err());
        env::remove_var(ENV_WORKERS);
    }
}
