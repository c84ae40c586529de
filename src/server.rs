//! listener setup and the accept loop.

use std::{
    io,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpStream},
    os::fd::{AsRawFd, FromRawFd},
    sync::Arc,
    thread,
    time::Duration,
};

use openssl::ssl::SslAcceptor;
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{error, info, trace, warn};

use crate::{
    QUEUE_DEPTH,
    config::Config,
    dispatch,
    error::Error,
    pool::WorkerPool,
    tls,
    uring::AsyncIoHandle,
};

const LISTEN_BACKLOG: i32 = 2048;
const MIN_WORKERS: usize = 32;

/// Owns the listener, the tls context, the worker pool and the accept
/// handle. Everything a worker needs is handed over by reference at
/// dispatch time; nothing global.
pub struct Server {
    listener: Socket,
    ring: AsyncIoHandle,
    pool: WorkerPool,
    config: Arc<Config>,
    acceptor: Arc<SslAcceptor>,
}

impl Server {
    /// Binds the ipv4 wildcard listener and builds the shared pieces.
    /// Failures here are fatal to startup.
    pub fn bind(config: Config) -> Result<Self, Error> {
        let acceptor = tls::build_acceptor(&config.ssl.certificate, &config.ssl.private_key)?;

        let listener = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
        let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.server.port);
        listener.bind(&addr.into())?;
        listener.listen(LISTEN_BACKLOG)?;

        let pool = WorkerPool::new(MIN_WORKERS, config.server.max_connections);
        let ring = AsyncIoHandle::new(2 * QUEUE_DEPTH)?;

        info!("listening on {addr}");
        Ok(Self {
            listener,
            ring,
            pool,
            config: Arc::new(config),
            acceptor: Arc::new(acceptor),
        })
    }

    /// The bound address; differs from the configured one when port 0 asked
    /// the kernel to pick.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        let addr = self.listener.local_addr()?;
        addr.as_socket()
            .ok_or_else(|| io::Error::other("listener has no inet address"))
    }

    /// Accept loop: one accept in flight at a time, each completed client
    /// handed to the pool. Runs until the process dies.
    pub fn run(mut self) -> Result<(), Error> {
        let listen_fd = self.listener.as_raw_fd();
        loop {
            let (fd, peer) = match self.ring.submit_accept(listen_fd) {
                Ok(accepted) => accepted,
                Err(ref e) if connection_error(e) => continue,
                Err(e) => {
                    // resource exhaustion lands here; back off instead of
                    // spinning on the listener.
                    error!("accept failed: {e}");
                    thread::sleep(Duration::from_secs(1));
                    continue;
                }
            };
            let stream = unsafe { TcpStream::from_raw_fd(fd) };
            trace!("accepted connection from {peer}");

            // the worker's readiness handle and the tls session provide the
            // asynchrony from here on; the socket itself stays blocking.
            if let Err(e) = stream.set_nonblocking(false) {
                warn!("unable to configure accepted socket: {e}");
                continue;
            }

            let config = Arc::clone(&self.config);
            let acceptor = Arc::clone(&self.acceptor);
            let task = move || dispatch::handle_connection(stream, config, acceptor);
            if let Err(e) = self.pool.dispatch(task) {
                // shed load; the rejected task just dropped the socket.
                warn!("dropping connection from {peer}: {e}");
            }
        }
    }
}

/// Errors the next accept may clear; everything else backs off.
fn connection_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    )
}
