//! Run the same operation on every host of a group.
//!
//! Each host's closure runs its steps strictly in order; hosts themselves run
//! either one after another or one thread per host.

use serde::{Deserialize, Serialize};
use std::thread;

use crate::error::{Error, Result};
use crate::output::{BulkResult, HostError, HostOutcome};
use crate::server::Server;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Execution {
    #[default]
    Parallel,
    Sequential,
}

pub fn on_hosts<T, F>(
    action: &str,
    servers: &[Server],
    execution: Execution,
    op: F,
) -> BulkResult<T>
where
    T: Serialize + Send,
    F: Fn(&Server) -> Result<T> + Sync,
{
    let results: Vec<(String, Result<T>)> = match execution {
        Execution::Sequential => servers
            .iter()
            .map(|server| (server.host.clone(), op(server)))
            .collect(),
        Execution::Parallel if servers.len() <= 1 => servers
            .iter()
            .map(|server| (server.host.clone(), op(server)))
            .collect(),
        Execution::Parallel => thread::scope(|scope| {
            let op = &op;
            let handles: Vec<_> = servers
                .iter()
                .map(|server| (server.host.clone(), scope.spawn(move || op(server))))
                .collect();

            handles
                .into_iter()
                .map(|(host, handle)| {
                    let result = handle.join().unwrap_or_else(|_| {
                        Err(Error::internal_unexpected(format!(
                            "Worker for host '{}' panicked",
                            host
                        )))
                    });
                    (host, result)
                })
                .collect()
        }),
    };

    let outcomes = results
        .into_iter()
        .map(|(host, result)| match result {
            Ok(value) => HostOutcome {
                host,
                result: Some(value),
                error: None,
            },
            Err(err) => {
                log_status!("fanout", "{} failed on {}: {}", action, host, err.message);
                HostOutcome {
                    host,
                    result: None,
                    error: Some(HostError::from(&err)),
                }
            }
        })
        .collect();

    BulkResult::new(action, outcomes)
}
