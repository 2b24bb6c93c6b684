use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::debug;

use crate::ipc::serializer::{read_signal, write_signal};
use crate::ipc::signal::Signal;
use crate::ipc::SignalError;

/// One request/response exchange with the coordinator.
pub trait SignalClient {
    fn send(&mut self, signal: &Signal) -> Result<Signal, SignalError>;
}

/// Opens a fresh connection per exchange; the connection closes when the client is dropped.
pub trait SignalClientFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn SignalClient>, SignalError>;
}

pub struct TcpSignalClient {
    stream: TcpStream,
}

impl TcpSignalClient {
    pub fn connect(address: &str, timeout: Duration) -> Result<Self, SignalError> {
        let mut last_error = None;
        for socket_address in address.to_socket_addrs()? {
            match TcpStream::connect_timeout(&socket_address, timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(timeout))?;
                    stream.set_write_timeout(Some(timeout))?;
                    stream.set_nodelay(true)?;
                    return Ok(Self { stream });
                }
                Err(error) => last_error = Some(error),
            }
        }
        Err(match last_error {
            Some(error) => error.into(),
            None => SignalError::Unresolved(address.to_string()),
        })
    }
}

impl SignalClient for TcpSignalClient {
    fn send(&mut self, signal: &Signal) -> Result<Signal, SignalError> {
        write_signal(&mut self.stream, signal)?;
        match read_signal(&mut self.stream)? {
            Some(Signal::Error(message)) => Err(SignalError::Remote(message)),
            Some(response) => Ok(response),
            None => Err(SignalError::ConnectionClosed),
        }
    }
}

impl Drop for TcpSignalClient {
    fn drop(&mut self) {
        if let Err(error) = self.stream.shutdown(Shutdown::Both) {
            debug!(error = %error, "failed to close signal connection");
        }
    }
}

#[derive(Clone, Debug)]
pub struct TcpSignalClientFactory {
    address: String,
    timeout: Duration,
}

impl TcpSignalClientFactory {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl SignalClientFactory for TcpSignalClientFactory {
    fn create(&self) -> Result<Box<dyn SignalClient>, SignalError> {
        Ok(Box::new(TcpSignalClient::connect(&self.address, self.timeout)?))
    }
}
