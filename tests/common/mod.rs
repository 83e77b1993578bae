//! Shared fixtures for the integration tests: rule builders and an
//! in-process engine listening on a temporary control socket.

#![allow(dead_code)]

use mfw::engine::{server, RuleStore};
use mfw::models::rule::{Direction, Endpoint, IpVersion, Rule, PROTO_TCP};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub fn v4(a: u8, b: u8, c: u8, d: u8) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(a, b, c, d))
}

pub fn v4_endpoint(addr: IpAddr, mask: IpAddr, port: u16) -> Endpoint {
    Endpoint::from_addrs(Some(addr), Some(mask), port)
}

/// The V4 rule used throughout: inbound TCP from 10.0.0.0/24 to port 443.
pub fn https_from_lan() -> Rule {
    https_from(v4(10, 0, 0, 0))
}

pub fn https_from(source: IpAddr) -> Rule {
    Rule::new(Direction::In, IpVersion::V4)
        .with_source(v4_endpoint(source, v4(255, 255, 255, 0), 0))
        .with_destination(Endpoint {
            port: 443,
            ..Endpoint::ANY
        })
        .with_protocol(PROTO_TCP)
}

pub fn inbound_tcp_port(port: u16) -> Rule {
    Rule::new(Direction::In, IpVersion::V4)
        .with_destination(Endpoint {
            port,
            ..Endpoint::ANY
        })
        .with_protocol(PROTO_TCP)
}

/// Engine serving on a socket inside its own temporary directory.
pub struct TestEngine {
    pub socket: PathBuf,
    pub store: Arc<RuleStore>,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<mfw::Result<()>>,
    _dir: TempDir,
}

impl TestEngine {
    pub fn start(max_rules: usize) -> Self {
        let dir = TempDir::new().unwrap();
        let socket = dir.path().join("mfw.sock");
        let listener = server::bind(&socket).unwrap();
        let store = Arc::new(RuleStore::with_capacity_limit(max_rules));
        let (shutdown, rx) = oneshot::channel::<()>();

        let task = tokio::spawn(server::serve_until(listener, Arc::clone(&store), async {
            let _ = rx.await;
        }));

        TestEngine {
            socket,
            store,
            shutdown,
            task,
            _dir: dir,
        }
    }

    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        self.task.await.unwrap().unwrap();
    }
}
