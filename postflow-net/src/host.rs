//! Serving a binding over the wire.

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;

use postflow_core::binding::call::Request;
use postflow_core::binding::EngineBinding;
use postflow_core::error::EngineFault;
use postflow_core::RuntimeConfig;

use crate::channel::Channel;
use crate::endpoint::Stream;
use crate::error::Result;
use crate::msg::{MessageKind, WireMessage};

/// Exposes any [`EngineBinding`] to remote clients.
///
/// Hosting an in-process binding that loaded custom operator plugins makes
/// this a sidecar plugin host: remote workflows call the plugged operators
/// by name, none the wiser.
pub struct EngineHost {
    listener: TcpListener,
    binding: Arc<dyn EngineBinding>,
    config: RuntimeConfig,
}

impl EngineHost {
    /// Binds a listener. `addr` may carry port 0 to let the system pick.
    pub fn bind(
        addr: &str,
        binding: Arc<dyn EngineBinding>,
        config: RuntimeConfig,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        // clients bound their own timeouts; the host waits on idle
        // connections indefinitely
        let config = RuntimeConfig {
            call_timeout_ms: None,
            ..config
        };
        Ok(Self {
            listener,
            binding,
            config,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections forever, one thread per client.
    pub fn serve(&self) -> Result<()> {
        info!("hosting {} on {}", self.binding.describe(), self.local_addr()?);
        loop {
            let (stream, peer) = self.listener.accept()?;
            debug!("client connected from {}", peer);
            let binding = Arc::clone(&self.binding);
            let config = self.config.clone();
            std::thread::spawn(move || {
                if let Err(e) = serve_client(stream, binding, &config) {
                    warn!("client {} dropped: {}", peer, e);
                }
            });
        }
    }

    /// Accepts exactly `limit` connections, serving each on its own thread,
    /// and returns the join handles. Meant for tests.
    pub fn serve_connections(&self, limit: usize) -> Result<Vec<std::thread::JoinHandle<()>>> {
        let mut handles = Vec::with_capacity(limit);
        for _ in 0..limit {
            let (stream, _) = self.listener.accept()?;
            let binding = Arc::clone(&self.binding);
            let config = self.config.clone();
            handles.push(std::thread::spawn(move || {
                let _ = serve_client(stream, binding, &config);
            }));
        }
        Ok(handles)
    }
}

/// Per-connection request loop. Replies travel in whatever encoding the
/// request arrived in.
fn serve_client(
    stream: TcpStream,
    binding: Arc<dyn EngineBinding>,
    config: &RuntimeConfig,
) -> Result<()> {
    stream.set_nodelay(true)?;
    let mut channel = Channel::new(Stream::Tcp(stream), config)?;
    loop {
        let msg = match channel.receive() {
            Ok(msg) => msg,
            // disconnect without a goodbye
            Err(_) => break,
        };
        match msg.kind {
            MessageKind::Call => {
                let reply = match msg.unpack::<Request>() {
                    Ok(request) => match binding.call(request) {
                        Ok(response) => WireMessage::pack(
                            MessageKind::Reply,
                            msg.encoding,
                            &response,
                            config.compress_streams,
                        )?,
                        Err(err) => WireMessage::pack(
                            MessageKind::Fault,
                            msg.encoding,
                            &EngineFault::from(&err),
                            false,
                        )?,
                    },
                    Err(e) => {
                        let err = postflow_core::Error::Validation(format!(
                            "undecodable call payload: {}",
                            e
                        ));
                        WireMessage::pack(MessageKind::Fault, msg.encoding, &EngineFault::from(&err), false)?
                    }
                };
                channel.send(&reply)?;
            }
            MessageKind::Ping => {
                channel.send(&WireMessage::control(MessageKind::Pong))?;
            }
            MessageKind::Goodbye => break,
            other => {
                warn!("peer sent an unexpected {:?}, dropping the connection", other);
                break;
            }
        }
    }
    Ok(())
}
