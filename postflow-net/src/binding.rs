//! The remote engine binding.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use postflow_core::binding::call::{AdminCall, Request, Response};
use postflow_core::binding::EngineBinding;
use postflow_core::error::EngineFault;
use postflow_core::{RuntimeConfig, Server, ServerInfo};

use crate::channel::Channel;
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::msg::{Encoding, MessageKind, WireMessage};

/// An [`EngineBinding`] speaking the framed wire protocol to an engine in
/// another process.
///
/// The channel mutex serializes whole exchanges, so calls from any thread
/// and the heartbeat probe never interleave on the stream.
pub struct RemoteBinding {
    endpoint: Endpoint,
    encoding: Encoding,
    channel: Arc<Mutex<Channel>>,
    stop: Arc<AtomicBool>,
    heartbeat: Option<JoinHandle<()>>,
}

impl RemoteBinding {
    /// Connects to `endpoint` and starts the heartbeat if configured.
    pub fn connect(endpoint: Endpoint, config: &RuntimeConfig) -> Result<Self> {
        let timeout = config.call_timeout_ms.map(Duration::from_millis);
        let stream = endpoint.connect(timeout)?;
        let channel = Arc::new(Mutex::new(Channel::new(stream, config)?));
        let stop = Arc::new(AtomicBool::new(false));
        let heartbeat = if config.heartbeat_secs > 0 {
            Some(spawn_heartbeat(
                Arc::clone(&channel),
                Arc::clone(&stop),
                config.heartbeat_secs,
            ))
        } else {
            None
        };
        info!("connected to engine at {}", endpoint);
        Ok(Self {
            endpoint,
            encoding: Encoding::default(),
            channel,
            stop,
            heartbeat,
        })
    }

    /// Wraps this binding in a [`Server`], running version negotiation.
    pub fn into_server(self) -> postflow_core::Result<Server> {
        Server::connect(Box::new(self))
    }

    /// One full call exchange on the locked channel.
    fn exchange(&self, request: &Request) -> Result<Response> {
        let mut channel = self.channel.lock().unwrap();
        let compress = channel.compress();
        let msg = WireMessage::pack(MessageKind::Call, self.encoding, request, compress)?;
        channel.send(&msg)?;
        let reply = channel.receive()?;
        match reply.kind {
            MessageKind::Reply => reply.unpack(),
            MessageKind::Fault => {
                let fault: EngineFault = reply.unpack()?;
                Err(Error::Core(fault.into()))
            }
            other => Err(Error::Protocol(format!(
                "expected a reply or fault, peer sent {:?}",
                other
            ))),
        }
    }
}

impl EngineBinding for RemoteBinding {
    fn call(&self, request: Request) -> postflow_core::Result<Response> {
        self.exchange(&request).map_err(Into::into)
    }

    fn info(&self) -> postflow_core::Result<ServerInfo> {
        match self.exchange(&Request::Admin(AdminCall::ServerInfo))? {
            Response::ServerInfo(info) => Ok(info),
            other => Err(Error::Protocol(format!(
                "server info call answered with {:?}",
                other
            ))
            .into()),
        }
    }

    fn describe(&self) -> String {
        format!("remote engine at {}", self.endpoint)
    }
}

impl Drop for RemoteBinding {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        // best-effort goodbye, the peer drops the connection either way
        if let Ok(mut channel) = self.channel.lock() {
            let _ = channel.send(&WireMessage::control(MessageKind::Goodbye));
        }
        if let Some(handle) = self.heartbeat.take() {
            let _ = handle.join();
        }
        info!("disconnected from engine at {}", self.endpoint);
    }
}

fn spawn_heartbeat(
    channel: Arc<Mutex<Channel>>,
    stop: Arc<AtomicBool>,
    interval_secs: u64,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let step = Duration::from_millis(200);
        let mut elapsed = Duration::ZERO;
        let interval = Duration::from_secs(interval_secs);
        loop {
            std::thread::sleep(step);
            if stop.load(Ordering::SeqCst) {
                break;
            }
            elapsed += step;
            if elapsed < interval {
                continue;
            }
            elapsed = Duration::ZERO;
            let mut channel = channel.lock().unwrap();
            let alive = channel
                .send(&WireMessage::control(MessageKind::Ping))
                .and_then(|_| channel.receive())
                .map(|reply| reply.kind == MessageKind::Pong);
            match alive {
                Ok(true) => trace!("heartbeat answered"),
                Ok(false) => {
                    warn!("heartbeat answered with an unexpected message");
                    break;
                }
                Err(e) => {
                    warn!("heartbeat failed: {}", e);
                    break;
                }
            }
        }
    })
}
