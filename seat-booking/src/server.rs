use std::{future::Future, net::SocketAddr, sync::Arc};

use anyhow::Context;
use tokio::{
    io::{self, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{TcpListener, TcpStream, ToSocketAddrs},
    sync::AcquireError,
};

use crate::{
    config::ServerConfig,
    grid::{Grid, SharedGrid},
    pool::{Backoff, DispatchError, WorkerPool},
    protocol::{Request, Response},
};

#[derive(thiserror::Error, Debug)]
pub enum ConnectionError {
    #[error("{0}")]
    Io(#[from] tokio::io::Error),

    #[error("no request was received before the deadline")]
    Timeout,

    #[error("the client closed the connection before sending a request")]
    Disconnected,
}

pub struct Server {
    config: Arc<ServerConfig>,
    grid: SharedGrid,
    listener: TcpListener,
    pool: WorkerPool,
}

impl Server {
    pub async fn bind<A>(config: ServerConfig, addr: A) -> anyhow::Result<Self>
    where
        A: ToSocketAddrs,
    {
        let listener = TcpListener::bind(addr)
            .await
            .context("unable to create the listening socket")?;

        Ok(Self {
            grid: Grid::shared(&config),
            pool: WorkerPool::new(config.max_workers),
            config: Arc::new(config),
            listener,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves connections until `shutdown` resolves or accepting fails,
    /// then drains the in-flight workers.
    pub async fn run_until<S>(self, shutdown: S) -> anyhow::Result<()>
    where
        S: Future<Output = ()>,
    {
        let Self {
            config,
            grid,
            listener,
            mut pool,
        } = self;
        tokio::pin!(shutdown);

        let outcome: anyhow::Result<()> = loop {
            let (stream, peer) = tokio::select! {
                _ = &mut shutdown => break Ok(()),
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        tracing::error!("error on accepting connections: {}", err);
                        break Err(anyhow::Error::from(err).context("accepting connections"));
                    }
                },
            };
            tracing::debug!("accepted connection from {}", peer);

            let work = handle_connection(stream, grid.clone(), config.clone());
            tokio::select! {
                // a connection still waiting for a worker is dropped
                _ = &mut shutdown => break Ok(()),
                submitted = submit(&mut pool, work) => match submitted {
                    Ok(()) => tracing::debug!("{} workers running", pool.live_workers()),
                    Err(err) => {
                        tracing::error!("failed to dispatch a connection: {}", err);
                        break Err(anyhow::Error::from(err).context("dispatching a connection"));
                    }
                },
            }
        };

        // stop accepting before waiting on anyone
        drop(listener);
        tracing::info!("giving every worker a chance to terminate gracefully...");

        pool.drain(config.grace_period()).await;

        if let Ok(grid) = grid.lock() {
            tracing::debug!("releasing the grid, {} seats booked", grid.booked_count());
        }
        drop(grid);

        tracing::info!("bye");
        outcome
    }
}

// Hands the work over to the pool, re-submitting it while the pool asks for a retry.
async fn submit<W>(pool: &mut WorkerPool, mut work: W) -> Result<(), AcquireError>
where
    W: Future<Output = ()> + Send + 'static,
{
    let mut backoff = Backoff::default();
    loop {
        match pool.dispatch(work).await {
            Ok(()) => return Ok(()),
            Err(DispatchError::Retry(returned)) => {
                tracing::debug!("failed to dispatch work, retrying");
                work = returned;
                backoff.wait().await;
            }
            Err(DispatchError::Closed(err)) => return Err(err),
        }
    }
}

async fn handle_connection(mut stream: TcpStream, grid: SharedGrid, config: Arc<ServerConfig>) {
    match serve(&mut stream, &grid, &config).await {
        Ok(()) => {}
        Err(ConnectionError::Io(err)) => tracing::error!("connection failed: {}", err),
        Err(reason) => tracing::debug!("abandoning connection: {}", reason),
    }
    // dropping the stream closes the connection
}

// A single request/response cycle. The whole request must arrive in one read.
async fn serve<S>(
    stream: &mut S,
    grid: &SharedGrid,
    config: &ServerConfig,
) -> Result<(), ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut request = vec![0u8; config.max_request_bytes];
    let rcount = tokio::time::timeout(config.recv_timeout, read_once(stream, &mut request))
        .await
        .map_err(|_| ConnectionError::Timeout)??;
    if rcount == 0 {
        return Err(ConnectionError::Disconnected);
    }

    let response = match Request::parse(&request[..rcount]) {
        Some(request) => {
            tracing::debug!("received a {} request", request.command().name());
            execute(request, grid)
        }
        None => Response::Invalid,
    };
    tracing::debug!("responded: {:?}", response);

    write_frame(stream, &response.to_bytes()).await?;
    stream.shutdown().await?;

    Ok(())
}

fn execute(request: Request, grid: &SharedGrid) -> Response {
    let mut grid = grid.lock().unwrap();

    match request {
        Request::GetAvailableSeats => Response::Listing(grid.list_available()),
        Request::BookSeats(coordinates) => match grid.book(&coordinates) {
            Ok(code) => Response::Booked(code),
            Err(reason) => Response::Failed(reason),
        },
        Request::RevokeBooking(code) => match grid.revoke(&code) {
            Ok(()) => Response::Revoked,
            Err(reason) => Response::Failed(reason),
        },
    }
}

async fn read_once<R>(reader: &mut R, buffer: &mut [u8]) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    loop {
        match reader.read(buffer).await {
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            result => return result,
        }
    }
}

async fn write_frame<W>(writer: &mut W, mut frame: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while !frame.is_empty() {
        match writer.write(frame).await {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(written) => frame = &frame[written..],
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }

    Ok(())
}
