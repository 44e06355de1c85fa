use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, RawFd};

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tracing::{debug, info, trace, warn};

use crate::ae::{AeLoop, EventHandler, FeType, TeType, TimerId, get_current_time_ms};
use crate::client::Client;
use crate::command::{Dispatch, SharedObjects, process_command};
use crate::config::Config;
use crate::db::GodisDb;
use crate::error::ServerError;
use crate::object::GobjRef;

/// Pending connections the kernel queues for `accept`.
pub const BACKLOG: i32 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileProc {
    Accept,
    ReadQuery,
    SendReply,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeProc {
    ServerCron,
}

pub struct Server {
    listener: Socket,
    local_addr: SocketAddr,
    db: GodisDb,
    clients: HashMap<RawFd, Client>,
    shared: SharedObjects,
    config: Config,
    cron: Option<TimerId>,
}

impl Server {
    /// Binds and listens on `config.host:config.port`. Port 0 picks a free
    /// port; see [`Server::local_addr`].
    pub fn new(config: Config) -> Result<Self, ServerError> {
        let bind = config.bind_address();
        let addr: SocketAddr = bind.parse().map_err(|source| ServerError::Address {
            addr: bind.clone(),
            source,
        })?;
        let listen_err = |source| ServerError::Listen {
            addr: bind.clone(),
            source,
        };

        let listener = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(listen_err)?;
        listener.set_reuse_address(true).map_err(listen_err)?;
        listener.bind(&SockAddr::from(addr)).map_err(listen_err)?;
        listener.listen(BACKLOG).map_err(listen_err)?;
        listener.set_nonblocking(true).map_err(listen_err)?;

        let local_addr = listener.local_addr()?.as_socket().unwrap_or(addr);
        info!(addr = %local_addr, "godis listening");

        Ok(Self {
            listener,
            local_addr,
            db: GodisDb::new(),
            clients: HashMap::new(),
            shared: SharedObjects::default(),
            config,
            cron: None,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn db(&self) -> &GodisDb {
        &self.db
    }

    pub fn db_mut(&mut self) -> &mut GodisDb {
        &mut self.db
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Arms the accept handler and the expiration cron on `el`.
    pub fn register(&mut self, el: &mut AeLoop<Self>) -> io::Result<()> {
        el.add_file_event(&self.listener, FeType::Readable, FileProc::Accept)?;
        let id = el.add_time_event(TeType::Normal, self.config.cron_interval_ms, TimeProc::ServerCron);
        self.cron = Some(id);
        debug!(cron = id, interval_ms = self.config.cron_interval_ms, "server registered");
        Ok(())
    }

    fn accept_handler(&mut self, el: &mut AeLoop<Self>) {
        loop {
            match self.listener.accept() {
                Ok((socket, peer)) => {
                    if let Err(e) = socket.set_nonblocking(true) {
                        warn!(error = %e, "failed to set client nonblocking");
                        continue;
                    }
                    let client = Client::new(socket);
                    let fd = client.fd();
                    if let Err(e) = el.add_file_event(client.socket(), FeType::Readable, FileProc::ReadQuery) {
                        warn!(fd, error = %e, "failed to register client");
                        continue;
                    }
                    debug!(fd, peer = ?peer.as_socket(), "client connected");
                    self.clients.insert(fd, client);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "accept error");
                    break;
                }
            }
        }
    }

    fn read_query_from_client(&mut self, el: &mut AeLoop<Self>, fd: RawFd) {
        let Some(client) = self.clients.get_mut(&fd) else {
            return;
        };
        match client.read_query() {
            Ok(0) => {
                debug!(fd, "client closed connection");
                self.free_client(el, fd);
            }
            Ok(n) => {
                trace!(fd, bytes = n, "read query");
                self.process_query_buf(el, fd);
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {}
            Err(e) => {
                debug!(fd, error = %e, "read error");
                self.free_client(el, fd);
            }
        }
    }

    /// Runs every complete command sitting in the client's query buffer.
    fn process_query_buf(&mut self, el: &mut AeLoop<Self>, fd: RawFd) {
        loop {
            let Some(client) = self.clients.get_mut(&fd) else {
                return;
            };
            let args = match client.query.parse() {
                Ok(true) => client.query.take_args(),
                Ok(false) => return,
                Err(e) => {
                    warn!(fd, error = %e, "protocol error, closing client");
                    self.free_client(el, fd);
                    return;
                }
            };
            if args.is_empty() {
                continue;
            }
            debug!(fd, cmd = %args[0].display(), argc = args.len(), "processing command");
            match process_command(&mut self.db, &args) {
                Dispatch::Quit => {
                    debug!(fd, "client quit");
                    self.free_client(el, fd);
                    return;
                }
                Dispatch::Reply(reply) => {
                    let obj = reply.encode(&self.shared);
                    self.add_reply(el, fd, obj);
                }
            }
        }
    }

    fn add_reply(&mut self, el: &mut AeLoop<Self>, fd: RawFd, obj: GobjRef) {
        let Some(client) = self.clients.get_mut(&fd) else {
            return;
        };
        client.add_reply(obj);
        if let Err(e) = el.add_file_event(client.socket(), FeType::Writable, FileProc::SendReply) {
            warn!(fd, error = %e, "failed to arm reply writer");
            self.free_client(el, fd);
        }
    }

    fn send_reply_to_client(&mut self, el: &mut AeLoop<Self>, fd: RawFd) {
        let Some(client) = self.clients.get_mut(&fd) else {
            return;
        };
        match client.write_replies() {
            Ok(n) => {
                trace!(fd, bytes = n, "sent reply");
                if client.reply.is_empty() {
                    client.sent_len = 0;
                    el.remove_file_event(fd, FeType::Writable);
                }
            }
            Err(e) => {
                debug!(fd, error = %e, "write error");
                self.free_client(el, fd);
            }
        }
    }

    fn free_client(&mut self, el: &mut AeLoop<Self>, fd: RawFd) {
        el.remove_file_event(fd, FeType::Readable);
        el.remove_file_event(fd, FeType::Writable);
        if self.clients.remove(&fd).is_some() {
            debug!(fd, clients = self.clients.len(), "client freed");
        }
    }

    fn server_cron(&mut self) {
        let evicted = self
            .db
            .active_expire_cycle(self.config.expire_check_count, get_current_time_ms());
        if evicted > 0 {
            debug!(evicted, "server cron");
        }
    }
}

impl EventHandler for Server {
    type FileProc = FileProc;
    type TimeProc = TimeProc;

    fn file_event(&mut self, el: &mut AeLoop<Self>, fd: RawFd, _mask: FeType, proc_: FileProc) {
        match proc_ {
            FileProc::Accept => self.accept_handler(el),
            FileProc::ReadQuery => self.read_query_from_client(el, fd),
            FileProc::SendReply => self.send_reply_to_client(el, fd),
        }
    }

    fn time_event(&mut self, _el: &mut AeLoop<Self>, _id: TimerId, proc_: TimeProc) {
        match proc_ {
            TimeProc::ServerCron => self.server_cron(),
        }
    }
}

impl AsRawFd for Server {
    fn as_raw_fd(&self) -> RawFd {
        self.listener.as_raw_fd()
    }
}
