//! Loopback control socket
//!
//! One request per line, one reply per request (`ok` or `err <reason>`).
//! `play` and `pause` are what the home-screen widget and media keys send;
//! the `focus ...` requests let an outside program act as the audio-focus
//! authority.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::net::SocketAddr;
use std::str::FromStr;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::coordinator::SessionHandle;
use crate::focus::FocusSignals;

pub const DEFAULT_CONTROL_PORT: u16 = 47474;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRequest {
    Play,
    Pause,
    FocusLoss,
    FocusTransientLoss,
    FocusRestore,
}

impl FromStr for ControlRequest {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let words: Vec<String> = line.split_whitespace().map(str::to_ascii_lowercase).collect();
        let words: Vec<&str> = words.iter().map(String::as_str).collect();
        match words.as_slice() {
            ["play"] => Ok(ControlRequest::Play),
            ["pause"] => Ok(ControlRequest::Pause),
            ["focus", "loss"] => Ok(ControlRequest::FocusLoss),
            ["focus", "transient"] => Ok(ControlRequest::FocusTransientLoss),
            ["focus", "restore"] => Ok(ControlRequest::FocusRestore),
            [] => anyhow::bail!("empty request"),
            _ => anyhow::bail!("unknown request '{}'", line.trim()),
        }
    }
}

impl ControlRequest {
    pub fn as_line(&self) -> &'static str {
        match self {
            ControlRequest::Play => "play",
            ControlRequest::Pause => "pause",
            ControlRequest::FocusLoss => "focus loss",
            ControlRequest::FocusTransientLoss => "focus transient",
            ControlRequest::FocusRestore => "focus restore",
        }
    }
}

pub fn control_addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

pub struct ControlServer {
    listener: TcpListener,
    session: SessionHandle,
    focus: FocusSignals,
}

impl ControlServer {
    pub async fn bind(addr: SocketAddr, session: SessionHandle, focus: FocusSignals) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind control socket on {}", addr))?;
        Ok(Self { listener, session, focus })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the token is cancelled.
    pub async fn serve(self, cancel: CancellationToken) {
        if let Ok(addr) = self.listener.local_addr() {
            info!("Control socket listening on {}", addr);
        }

        loop {
            let accepted = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    debug!("Control connection from {}", peer);
                    let session = self.session.clone();
                    let focus = self.focus.clone();
                    let cancel = cancel.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, session, focus, cancel).await {
                            debug!("Control connection from {} closed: {}", peer, e);
                        }
                    });
                }
                Err(e) => warn!("Control socket accept failed: {}", e),
            }
        }
        debug!("Control socket closed");
    }
}

async fn handle_connection(
    stream: TcpStream,
    session: SessionHandle,
    focus: FocusSignals,
    cancel: CancellationToken,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            return Ok(());
        };

        let reply = match dispatch(&line, &session, &focus).await {
            Ok(()) => "ok\n".to_string(),
            Err(e) => format!("err {}\n", e),
        };
        writer.write_all(reply.as_bytes()).await?;
    }
}

async fn dispatch(line: &str, session: &SessionHandle, focus: &FocusSignals) -> Result<()> {
    let request: ControlRequest = line.parse()?;
    debug!("Control request: {:?}", request);
    match request {
        ControlRequest::Play => session.play().await,
        ControlRequest::Pause => session.pause().await,
        ControlRequest::FocusLoss => {
            focus.interrupt(false).await;
            Ok(())
        }
        ControlRequest::FocusTransientLoss => {
            focus.interrupt(true).await;
            Ok(())
        }
        ControlRequest::FocusRestore => {
            focus.restore().await;
            Ok(())
        }
    }
}

/// Send one request to a running player and return its reply.
pub async fn send_request(addr: SocketAddr, request: ControlRequest) -> Result<()> {
    let stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("no player is listening on {}", addr))?;
    let (reader, mut writer) = stream.into_split();
    writer.write_all(format!("{}\n", request.as_line()).as_bytes()).await?;

    let mut lines = BufReader::new(reader).lines();
    let reply = lines
        .next_line()
        .await?
        .ok_or_else(|| anyhow::anyhow!("player closed the connection without replying"))?;

    match reply.strip_prefix("err ") {
        Some(reason) => anyhow::bail!("player rejected '{}': {}", request.as_line(), reason),
        None if reply == "ok" => Ok(()),
        None => anyhow::bail!("unexpected reply '{}'", reply),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{Command, FocusChange, SessionEvent};
    use crate::coordinator::session_channel;
    use crate::focus::{AudioFocus, AudioFocusState, FocusArbiter};

    #[test]
    fn test_parse_requests() {
        assert_eq!("play".parse::<ControlRequest>().unwrap(), ControlRequest::Play);
        assert_eq!(" PAUSE \r".parse::<ControlRequest>().unwrap(), ControlRequest::Pause);
        assert_eq!("focus transient".parse::<ControlRequest>().unwrap(), ControlRequest::FocusTransientLoss);
        assert_eq!("focus  loss".parse::<ControlRequest>().unwrap(), ControlRequest::FocusLoss);
        assert!("stop".parse::<ControlRequest>().is_err());
        assert!("".parse::<ControlRequest>().is_err());
    }

    #[test]
    fn test_request_lines_parse_back() {
        for request in [
            ControlRequest::Play,
            ControlRequest::Pause,
            ControlRequest::FocusLoss,
            ControlRequest::FocusTransientLoss,
            ControlRequest::FocusRestore,
        ] {
            assert_eq!(request.as_line().parse::<ControlRequest>().unwrap(), request);
        }
    }

    #[tokio::test]
    async fn test_requests_reach_the_session_queue() {
        let (handle, mut rx, _snapshots) = session_channel();
        let (mut arbiter, signals) = FocusArbiter::new(handle.events());
        let server = ControlServer::bind(control_addr(0), handle, signals).await.unwrap();
        let addr = server.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let serving = tokio::spawn(server.serve(cancel.clone()));

        send_request(addr, ControlRequest::Play).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), SessionEvent::Command(Command::Play));

        send_request(addr, ControlRequest::Pause).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), SessionEvent::Command(Command::Pause));

        assert!(arbiter.request());
        send_request(addr, ControlRequest::FocusTransientLoss).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), SessionEvent::Focus(FocusChange::TransientLoss));
        assert_eq!(arbiter.state(), AudioFocusState::TransientLoss);

        cancel.cancel();
        serving.await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_request_is_rejected() {
        let (handle, _rx, _snapshots) = session_channel();
        let (_arbiter, signals) = FocusArbiter::new(handle.events());
        let server = ControlServer::bind(control_addr(0), handle, signals).await.unwrap();
        let addr = server.local_addr().unwrap();
        let cancel = CancellationToken::new();
        tokio::spawn(server.serve(cancel.clone()));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"rewind\n").await.unwrap();
        let mut lines = BufReader::new(stream).lines();
        let reply = lines.next_line().await.unwrap().unwrap();
        assert_eq!(reply, "err unknown request 'rewind'");

        cancel.cancel();
    }

    #[tokio::test]
    async fn test_client_reports_missing_player() {
        // Bind then drop to find a port nobody listens on
        let port = {
            let listener = TcpListener::bind(control_addr(0)).await.unwrap();
            listener.local_addr().unwrap().port()
        };
        assert!(send_request(control_addr(port), ControlRequest::Play).await.is_err());
    }
}
