//! thin wrapper over the kernel submission/completion queue.
//!
//! The handle is strictly a readiness and accept notifier: no buffered i/o
//! goes through it, which leaves the tls layer in charge of buffering. Every
//! operation is one-shot: the caller submits, waits and consumes the
//! completion before the call returns, so a handle never carries state
//! between calls.

use std::{
    cell::RefCell,
    io, mem,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    os::fd::RawFd,
};

use io_uring::{IoUring, opcode, squeue, types};

use crate::QUEUE_DEPTH;

/// Readiness interest for poll submissions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Interest {
    Readable,
    Writable,
    Both,
}

impl Interest {
    fn flags(self) -> u32 {
        match self {
            Self::Readable => libc::POLLIN as u32,
            Self::Writable => libc::POLLOUT as u32,
            Self::Both => (libc::POLLIN | libc::POLLOUT) as u32,
        }
    }
}

pub(crate) struct AsyncIoHandle {
    ring: IoUring,
}

const TOKEN_SINGLE: u64 = 0;
const TOKEN_A: u64 = 1;
const TOKEN_B: u64 = 2;
const TOKEN_CANCEL: u64 = 3;

impl AsyncIoHandle {
    pub(crate) fn new(depth: u32) -> io::Result<Self> {
        Ok(Self {
            ring: IoUring::new(depth)?,
        })
    }

    /// Submits a single accept on `listen_fd` and blocks until a client
    /// arrives. At most one accept is in flight per handle.
    pub(crate) fn submit_accept(&mut self, listen_fd: RawFd) -> io::Result<(RawFd, SocketAddr)> {
        let mut addr: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        let sqe = opcode::Accept::new(
            types::Fd(listen_fd),
            &mut addr as *mut _ as *mut libc::sockaddr,
            &mut len,
        )
        .build()
        .user_data(TOKEN_SINGLE);
        // addr and len outlive the operation: submit_one drains the
        // completion before returning.
        let res = self.submit_one(&sqe)?;
        if res < 0 {
            return Err(io::Error::from_raw_os_error(-res));
        }
        Ok((res as RawFd, peer_addr(&addr)))
    }

    /// Blocks until `fd` reports the requested readiness or an error
    /// condition. Returns the raised poll events.
    pub(crate) fn wait_readable(&mut self, fd: RawFd, interest: Interest) -> io::Result<u32> {
        let sqe = opcode::PollAdd::new(types::Fd(fd), interest.flags())
            .build()
            .user_data(TOKEN_SINGLE);
        let res = self.submit_one(&sqe)?;
        if res < 0 {
            return Err(io::Error::from_raw_os_error(-res));
        }
        Ok(res as u32)
    }

    /// Blocks until at least one of the two descriptors is readable and
    /// reports which. The slower poll is cancelled and its completion
    /// drained before returning, keeping the one-shot contract.
    pub(crate) fn wait_any(&mut self, a: RawFd, b: RawFd) -> io::Result<(bool, bool)> {
        unsafe {
            let mut sq = self.ring.submission();
            sq.push(
                &opcode::PollAdd::new(types::Fd(a), libc::POLLIN as u32)
                    .build()
                    .user_data(TOKEN_A),
            )
            .map_err(|_| queue_full())?;
            sq.push(
                &opcode::PollAdd::new(types::Fd(b), libc::POLLIN as u32)
                    .build()
                    .user_data(TOKEN_B),
            )
            .map_err(|_| queue_full())?;
        }
        self.ring.submit_and_wait(1)?;

        let mut res_a = None;
        let mut res_b = None;
        let mut cancelled = false;
        loop {
            for cqe in self.ring.completion() {
                match cqe.user_data() {
                    TOKEN_A => res_a = Some(cqe.result()),
                    TOKEN_B => res_b = Some(cqe.result()),
                    // cancel result is irrelevant: ENOENT means the poll
                    // completed on its own and its cqe is still inbound.
                    _ => {}
                }
            }
            if res_a.is_some() && res_b.is_some() {
                break;
            }
            if !cancelled {
                let target = if res_a.is_some() { TOKEN_B } else { TOKEN_A };
                unsafe {
                    self.ring
                        .submission()
                        .push(
                            &opcode::AsyncCancel::new(target)
                                .build()
                                .user_data(TOKEN_CANCEL),
                        )
                        .map_err(|_| queue_full())?;
                }
                cancelled = true;
            }
            self.ring.submit_and_wait(1)?;
        }

        let ready = |res: Option<i32>| matches!(res, Some(n) if n > 0);
        Ok((ready(res_a), ready(res_b)))
    }

    fn submit_one(&mut self, sqe: &squeue::Entry) -> io::Result<i32> {
        unsafe {
            self.ring.submission().push(sqe).map_err(|_| queue_full())?;
        }
        self.ring.submit_and_wait(1)?;
        let cqe = self
            .ring
            .completion()
            .next()
            .expect("submit_and_wait(1) returned without a completion");
        Ok(cqe.result())
    }
}

fn queue_full() -> io::Error {
    io::Error::other("submission queue full")
}

fn peer_addr(storage: &libc::sockaddr_storage) -> SocketAddr {
    // the listener is bound to an ipv4 wildcard, so peers are ipv4.
    let addr = unsafe { &*(storage as *const _ as *const libc::sockaddr_in) };
    SocketAddr::V4(SocketAddrV4::new(
        Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr)),
        u16::from_be(addr.sin_port),
    ))
}

thread_local! {
    static LOCAL_HANDLE: RefCell<Option<AsyncIoHandle>> = const { RefCell::new(None) };
}

/// Runs `f` with the calling worker's handle, creating it on first use. The
/// handle lives until the worker thread exits and is never shared.
pub(crate) fn with_local<R>(f: impl FnOnce(&mut AsyncIoHandle) -> io::Result<R>) -> io::Result<R> {
    LOCAL_HANDLE.with(|cell| {
        let mut slot = cell.borrow_mut();
        if slot.is_none() {
            *slot = Some(AsyncIoHandle::new(QUEUE_DEPTH)?);
        }
        f(slot.as_mut().expect("handle initialized above"))
    })
}
