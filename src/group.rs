//! Fixed pool of event processors sharing one codec and one listener.
//!
//! ```text
//!                 EventGroup
//!   bind ──▶ Listen ──▶ processor k (acceptor)
//!                          │ accept
//!                          ▼
//!                  GroupCore::admit ──pick──▶ processor i ──Register──▶ Session
//!   connect ─────────────────────────pick──▶ processor j ──Register──▶ Session
//! ```
//!
//! Sessions are spread over the processors by the configured
//! [`Distribution`]. The group keeps a lock-free index of every live session
//! so any thread can find the processor that owns a given session.

use std::{
    mem,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering},
        mpsc::{self, RecvTimeoutError},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    thread::{Builder, JoinHandle},
    time::{Duration, Instant},
};

use lockfree::map::Map as LockfreeMap;
use mio::{
    net::{TcpListener, TcpStream},
    Token,
};
use tracing::{debug, error, info, warn};

use crate::{
    codec::Codec,
    config::{Distribution, GroupConfig},
    error::{Error, Result},
    listener::Listener,
    poll::{Command, Mailbox, Registration, Selector},
    processor::{self, EventProcessor, ProcessorHandle, ProcessorStats},
    session::{Session, SessionId, SessionState},
};

static NEXT_GROUP_ID: AtomicU64 = AtomicU64::new(1);

const CREATED: u8 = 0;
const RUNNING: u8 = 1;
const STOPPED: u8 = 2;

/// State shared by the group and all of its processors.
pub(crate) struct GroupCore<C: Codec> {
    group_id: u64,
    config: GroupConfig,
    codec: Arc<C>,
    mailboxes: Vec<Mailbox<C>>,
    stats: Vec<Arc<ProcessorStats>>,
    next_processor: AtomicUsize,
    next_acceptor: AtomicUsize,
    next_id: AtomicU64,
    sessions: LockfreeMap<u64, Session<C>>,
    live: AtomicUsize,
}

impl<C: Codec> GroupCore<C> {
    pub fn group_id(&self) -> u64 {
        self.group_id
    }

    pub fn config(&self) -> &GroupConfig {
        &self.config
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    fn handle(&self, index: usize) -> ProcessorHandle<C> {
        ProcessorHandle::new(self.mailboxes[index].clone(), Arc::clone(&self.stats[index]))
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn pick_processor(&self) -> usize {
        match self.config.distribution {
            Distribution::RoundRobin => {
                self.next_processor.fetch_add(1, Ordering::Relaxed) % self.mailboxes.len()
            }
            Distribution::LeastSessions => self
                .stats
                .iter()
                .enumerate()
                .min_by_key(|(index, stats)| (stats.sessions.load(Ordering::Acquire), *index))
                .map(|(index, _)| index)
                .unwrap_or(0),
        }
    }

    /// Creates a session for `stream` and hands it to the chosen processor.
    fn assign(
        &self,
        stream: TcpStream,
        peer_addr: SocketAddr,
        connecting: bool,
        reply: Option<mpsc::Sender<Result<()>>>,
    ) -> Result<Session<C>> {
        let index = self.pick_processor();
        let id = SessionId::new(self.next_id());
        let session = Session::new(
            id,
            peer_addr,
            stream.local_addr().ok(),
            SessionState::Connecting,
            Arc::clone(&self.codec),
            self.mailboxes[index].clone(),
        );

        self.sessions.insert(id.as_u64(), session.clone());
        self.stats[index].sessions.fetch_add(1, Ordering::AcqRel);
        self.live.fetch_add(1, Ordering::AcqRel);

        let registration = Registration {
            stream,
            session: session.clone(),
            connecting,
            reply,
        };
        if let Err(e) = self.mailboxes[index].send(Command::Register(registration)) {
            session.set_state(SessionState::Closed);
            self.release(&session);
            return Err(e);
        }
        Ok(session)
    }

    /// Takes ownership of an accepted connection, unless the group already
    /// holds `max_sessions` live sessions of either direction.
    pub fn admit(&self, stream: TcpStream, peer_addr: SocketAddr) {
        if let Some(max) = self.config.max_sessions {
            if self.live.load(Ordering::Acquire) >= max {
                warn!(%peer_addr, max, "max sessions reached, rejecting connection");
                return;
            }
        }
        if let Err(e) = stream.set_nodelay(self.config.no_delay) {
            warn!(%peer_addr, error = %e, "failed to set TCP_NODELAY");
        }
        match self.assign(stream, peer_addr, false, None) {
            Ok(session) => debug!(
                session = %session.id(),
                %peer_addr,
                processor = session.processor_index(),
                "connection accepted"
            ),
            Err(e) => warn!(%peer_addr, error = %e, "failed to hand accepted connection to a processor"),
        }
    }

    /// Forgets a closed session. Safe to call more than once.
    pub fn release(&self, session: &Session<C>) {
        if self.sessions.remove(&session.id().as_u64()).is_some() {
            self.stats[session.processor_index()]
                .sessions
                .fetch_sub(1, Ordering::AcqRel);
            self.live.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

/// The main entry point: a fixed pool of event processors plus bind, connect
/// and lifecycle management.
///
/// ## Example
///
/// ```rust,no_run
/// use bytes::Bytes;
/// use mill_nio::{
///     codec::LengthFieldCodec, BoxError, EventGroup, GroupConfig, Listener, Session,
/// };
/// use std::time::Duration;
///
/// struct Echo;
///
/// impl Listener<LengthFieldCodec> for Echo {
///     fn on_message_received(
///         &self,
///         session: &Session<LengthFieldCodec>,
///         message: Bytes,
///     ) -> Result<(), BoxError> {
///         session.send(&message)?;
///         Ok(())
///     }
/// }
///
/// let config = GroupConfig::builder().processors(2).build();
/// let group = EventGroup::new(config, LengthFieldCodec::default(), Echo)?;
/// group.start()?;
/// let addr = group.bind("127.0.0.1:0".parse()?)?;
/// println!("listening on {addr}");
/// group.stop(Duration::from_secs(2))?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct EventGroup<C: Codec, L: Listener<C>> {
    core: Arc<GroupCore<C>>,
    listener: Arc<L>,
    pending: Mutex<Vec<EventProcessor<C, L>>>,
    workers: Mutex<Vec<JoinHandle<Result<()>>>>,
    state: AtomicU8,
    local_addrs: Mutex<Vec<SocketAddr>>,
}

impl<C: Codec, L: Listener<C>> EventGroup<C, L> {
    /// Creates the group and its processors. No thread runs until [`start`](Self::start).
    ///
    /// ## Errors
    ///
    /// Returns an error if the configuration is invalid or a selector cannot be
    /// created.
    pub fn new(config: GroupConfig, codec: C, listener: L) -> Result<Self> {
        config.validate()?;

        let mut selectors = Vec::with_capacity(config.processors);
        let mut mailboxes = Vec::with_capacity(config.processors);
        for index in 0..config.processors {
            let selector = Selector::new(config.events_capacity)?;
            let (mailbox, receiver) = selector.channel(index);
            mailboxes.push(mailbox);
            selectors.push((selector, receiver));
        }

        let core = Arc::new(GroupCore {
            group_id: NEXT_GROUP_ID.fetch_add(1, Ordering::Relaxed),
            stats: (0..config.processors)
                .map(|_| Arc::new(ProcessorStats::default()))
                .collect(),
            config,
            codec: Arc::new(codec),
            mailboxes,
            next_processor: AtomicUsize::new(0),
            next_acceptor: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
            sessions: LockfreeMap::new(),
            live: AtomicUsize::new(0),
        });
        let listener = Arc::new(listener);

        let pending = selectors
            .into_iter()
            .enumerate()
            .map(|(index, (selector, receiver))| {
                EventProcessor::new(
                    index,
                    selector,
                    receiver,
                    Arc::clone(&core),
                    Arc::clone(&listener),
                )
            })
            .collect();

        Ok(Self {
            core,
            listener,
            pending: Mutex::new(pending),
            workers: Mutex::new(Vec::new()),
            state: AtomicU8::new(CREATED),
            local_addrs: Mutex::new(Vec::new()),
        })
    }

    /// Spawns one thread per processor, then binds and connects the addresses
    /// listed in the configuration.
    ///
    /// A group can be started once.
    pub fn start(&self) -> Result<()> {
        match self
            .state
            .compare_exchange(CREATED, RUNNING, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {}
            Err(RUNNING) => return Err(Error::IllegalState("event group already started")),
            Err(_) => return Err(Error::IllegalState("event group has been stopped")),
        }

        let processors = mem::take(&mut *lock(&self.pending));
        {
            let mut workers = lock(&self.workers);
            for processor in processors {
                let index = processor.index();
                let handle = Builder::new()
                    .name(format!("nio-processor-{index}"))
                    .spawn(move || processor.run())?;
                workers.push(handle);
            }
        }
        info!(processors = self.core.config.processors, "event group started");

        for addr in self.core.config.bind.clone() {
            self.bind(addr)?;
        }
        for addr in self.core.config.connect.clone() {
            self.connect(addr)?;
        }
        Ok(())
    }

    /// Stops every processor and waits for their threads.
    ///
    /// Listeners stop accepting at once. Sessions with an empty write queue are
    /// closed with [`CloseReason::Shutdown`](crate::CloseReason::Shutdown);
    /// the others keep flushing until `timeout` elapses, after which they are
    /// closed with [`CloseReason::ForcedShutdown`](crate::CloseReason::ForcedShutdown).
    ///
    /// ## Errors
    ///
    /// Returns the first fatal processor error, if any, or
    /// [`Error::IllegalState`] when called from one of the group's own
    /// processor threads.
    pub fn stop(&self, timeout: Duration) -> Result<()> {
        if self.is_processor_thread() {
            return Err(Error::IllegalState(
                "event group cannot be stopped from its own processor thread",
            ));
        }
        match self.state.swap(STOPPED, Ordering::AcqRel) {
            STOPPED => return Ok(()),
            CREATED => {
                lock(&self.pending).clear();
                return Ok(());
            }
            _ => {}
        }

        let deadline = Instant::now() + timeout;
        for mailbox in &self.core.mailboxes {
            let _ = mailbox.send(Command::Shutdown(deadline));
        }

        let workers = mem::take(&mut *lock(&self.workers));
        let mut result = Ok(());
        for worker in workers {
            let outcome = match worker.join() {
                Ok(outcome) => outcome,
                Err(_) => Err(Error::IllegalState("event processor thread panicked")),
            };
            if let Err(e) = outcome {
                error!(error = %e, "event processor terminated abnormally");
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        info!("event group stopped");
        result
    }

    /// Binds a listening socket and starts accepting on it.
    ///
    /// Accepted connections are distributed over all processors. Returns the
    /// bound address, which differs from `addr` when binding port 0.
    pub fn bind(&self, addr: SocketAddr) -> Result<SocketAddr> {
        if self.state.load(Ordering::Acquire) == STOPPED {
            return Err(Error::IllegalState("event group has been stopped"));
        }
        let listener = TcpListener::bind(addr)
            .map_err(|source| Error::ConnectionEstablishment { addr, source })?;
        let local_addr = listener.local_addr()?;
        let token = Token(self.core.next_id() as usize);
        let index =
            self.core.next_acceptor.fetch_add(1, Ordering::Relaxed) % self.core.mailboxes.len();
        self.core.mailboxes[index].send(Command::Listen(listener, local_addr, token))?;

        lock(&self.local_addrs).push(local_addr);
        info!(%local_addr, processor = index, "listener bound");
        Ok(local_addr)
    }

    /// Opens an outbound connection owned by one of the processors.
    ///
    /// Off-processor callers block until the connection is established or
    /// `connect_timeout` elapses, and get establishment failures as errors.
    /// Called from a processor thread, the session is returned immediately in
    /// the `Connecting` state and a failure is reported to
    /// [`Listener::on_exception_caught`].
    pub fn connect(&self, addr: SocketAddr) -> Result<Session<C>> {
        if self.state.load(Ordering::Acquire) != RUNNING {
            return Err(Error::IllegalState("event group is not running"));
        }
        let stream = TcpStream::connect(addr)
            .map_err(|source| Error::ConnectionEstablishment { addr, source })?;

        if self.is_processor_thread() {
            return self.core.assign(stream, addr, true, None);
        }

        let (reply, outcome) = mpsc::channel();
        let session = self.core.assign(stream, addr, true, Some(reply))?;
        match outcome.recv_timeout(self.core.config.connect_timeout) {
            Ok(Ok(())) => {
                debug!(session = %session.id(), %addr, "connection established");
                Ok(session)
            }
            Ok(Err(e)) => Err(e),
            Err(RecvTimeoutError::Timeout) => {
                session.close();
                Err(Error::ConnectTimeout(addr))
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(Error::ProcessorGone(session.processor_index()))
            }
        }
    }

    /// The processor that owns the session identified by `key`.
    pub fn processor_for(&self, key: SessionId) -> Option<ProcessorHandle<C>> {
        self.core
            .sessions
            .get(&key.as_u64())
            .map(|entry| self.core.handle(entry.val().processor_index()))
    }

    /// The processor running on the calling thread.
    ///
    /// ## Errors
    ///
    /// Returns [`Error::Affinity`] unless called from within one of this
    /// group's processor threads, e.g. from a listener callback.
    pub fn processor(&self) -> Result<ProcessorHandle<C>> {
        match processor::current() {
            Some((group_id, index)) if group_id == self.core.group_id => {
                Ok(self.core.handle(index))
            }
            _ => Err(Error::Affinity),
        }
    }

    /// Handles to every processor, in index order.
    pub fn processors(&self) -> Vec<ProcessorHandle<C>> {
        (0..self.core.mailboxes.len())
            .map(|index| self.core.handle(index))
            .collect()
    }

    pub fn session(&self, id: SessionId) -> Option<Session<C>> {
        self.core
            .sessions
            .get(&id.as_u64())
            .map(|entry| entry.val().clone())
    }

    /// Number of sessions currently owned by the group.
    pub fn session_count(&self) -> usize {
        self.core.live.load(Ordering::Acquire)
    }

    /// Addresses of the listeners bound so far.
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        lock(&self.local_addrs).clone()
    }

    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::Acquire) == RUNNING
    }

    pub fn config(&self) -> &GroupConfig {
        &self.core.config
    }

    pub fn codec(&self) -> &C {
        &self.core.codec
    }

    pub fn listener(&self) -> &Arc<L> {
        &self.listener
    }

    fn is_processor_thread(&self) -> bool {
        matches!(processor::current(), Some((group_id, _)) if group_id == self.core.group_id)
    }
}

impl<C: Codec, L: Listener<C>> Drop for EventGroup<C, L> {
    fn drop(&mut self) {
        if self.state.load(Ordering::Acquire) != RUNNING {
            return;
        }
        if self.is_processor_thread() {
            // Joining from here would wait on ourselves; let the processors wind down alone.
            self.state.store(STOPPED, Ordering::Release);
            let deadline = Instant::now() + self.core.config.shutdown_timeout;
            for mailbox in &self.core.mailboxes {
                let _ = mailbox.send(Command::Shutdown(deadline));
            }
            return;
        }
        if let Err(e) = self.stop(self.core.config.shutdown_timeout) {
            error!(error = %e, "event group stopped with an error");
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
