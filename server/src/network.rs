//! Server network layer: TCP listener, task spawning and shutdown

use crate::behavior::{CreatureBehavior, WanderBehavior};
use crate::chat::{ChatLog, ChatMessage};
use crate::client_manager::ClientManager;
use crate::config::ServerConfig;
use crate::dispatcher::Dispatcher;
use crate::error::ServerError;
use crate::handler::handle_connection;
use crate::notification::{notification_queue, NotificationKind, NotificationReceiver, NotificationSender};
use crate::simulation::{SimulationLoop, StopFlag};
use crate::turn_clock::TurnClock;
use crate::world::World;
use dungeon_shared::{Position, SERVER_NICK};
use log::{error, info, warn};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};

/// Shared state every server task works against
#[derive(Clone)]
pub struct ServerContext {
    pub world: Arc<RwLock<World>>,
    pub clients: Arc<RwLock<ClientManager>>,
    pub notifier: NotificationSender,
    pub chat: Arc<RwLock<ChatLog>>,
    pub config: Arc<ServerConfig>,
}

impl ServerContext {
    /// Builds the context and the queue's single consumer end
    pub fn new(config: ServerConfig, world: World) -> (Self, NotificationReceiver) {
        let clock = Arc::new(TurnClock::new());
        let (notifier, receiver) = notification_queue(clock);
        let context = Self {
            world: Arc::new(RwLock::new(world)),
            clients: Arc::new(RwLock::new(ClientManager::new(config.max_clients))),
            notifier,
            chat: Arc::new(RwLock::new(ChatLog::default())),
            config: Arc::new(config),
        };
        (context, receiver)
    }

    pub fn clock(&self) -> &Arc<TurnClock> {
        self.notifier.clock()
    }
}

/// Main server coordinating the listener, simulation and dispatcher
pub struct Server {
    listener: TcpListener,
    context: ServerContext,
    receiver: NotificationReceiver,
    behavior: Box<dyn CreatureBehavior>,
    stop: StopFlag,
}

impl Server {
    /// Binds with the demo world and the default creature behaviour
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;
        let world = World::demo(&config);
        let behavior = Box::new(WanderBehavior::new(config.seed));
        Self::with_world(config, world, behavior).await
    }

    pub async fn with_world(
        config: ServerConfig,
        world: World,
        behavior: Box<dyn CreatureBehavior>,
    ) -> Result<Self, ServerError> {
        config.validate()?;
        let listener = TcpListener::bind(config.bind_address()).await?;
        info!("Server listening on {}", listener.local_addr()?);

        let (context, receiver) = ServerContext::new(config, world);
        Ok(Server {
            listener,
            context,
            receiver,
            behavior,
            stop: StopFlag::new(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            context: self.context.clone(),
            stop: self.stop.clone(),
        }
    }

    /// Serves clients until a stop is requested or a fatal error occurs
    ///
    /// Returns the first fatal error raised by any task.
    pub async fn run(self) -> Result<(), ServerError> {
        let Server {
            listener,
            context,
            receiver,
            behavior,
            stop,
        } = self;

        let dispatcher = tokio::spawn(Dispatcher::new(receiver, Arc::clone(&context.clients)).run());
        let simulation = SimulationLoop::new(
            Arc::clone(&context.world),
            context.notifier.clone(),
            behavior,
            stop.clone(),
            &context.config,
        );
        let mut simulation = tokio::spawn(simulation.run());
        let (fatal_tx, mut fatal_rx) = mpsc::unbounded_channel::<ServerError>();

        let outcome = loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => spawn_session(&context, stream, peer, fatal_tx.clone()),
                    Err(e) => warn!("Failed to accept connection: {}", e),
                },
                Some(fatal) = fatal_rx.recv() => break Err(fatal),
                finished = &mut simulation => {
                    break match finished {
                        Ok(result) => result.map_err(ServerError::from),
                        Err(e) => Err(e.into()),
                    };
                }
            }
        };
        drop(listener);

        if let Err(e) = &outcome {
            error!("Stopping server: {}", e);
        }
        stop.request_stop();
        if !simulation.is_finished() {
            if let Err(e) = simulation.await {
                error!("Simulation task failed: {}", e);
            }
        }

        // Everything raised so far still reaches the clients before the dispatcher exits.
        if context.notifier.enqueue(NotificationKind::Shutdown).is_ok() {
            if let Err(e) = dispatcher.await {
                error!("Dispatcher task failed: {}", e);
            }
        }
        for connection in context.clients.read().await.connections() {
            connection.drop_peer();
        }

        info!("Server stopped at turn {}", context.clock().current_turn());
        outcome
    }
}

fn spawn_session(
    context: &ServerContext,
    stream: TcpStream,
    peer: SocketAddr,
    fatal_tx: mpsc::UnboundedSender<ServerError>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        warn!("Failed to set TCP_NODELAY for {}: {}", peer, e);
    }
    let context = context.clone();

    tokio::spawn(async move {
        let id = context.clients.write().await.allocate_id();
        info!("Client {} connected from {}", id, peer);

        let (reader, writer) = stream.into_split();
        match handle_connection(context, id, peer, reader, writer).await {
            Ok(()) => info!("Client {} ({}) disconnected", id, peer),
            Err(e) if e.is_fatal() => {
                error!("Client {} ({}): {}", id, peer, e);
                let _ = fatal_tx.send(e);
            }
            Err(e) => warn!("Client {} ({}) left: {}", id, peer, e),
        }
    });
}

/// Cloneable control surface for a running server
#[derive(Clone)]
pub struct ServerHandle {
    context: ServerContext,
    stop: StopFlag,
}

impl ServerHandle {
    /// Ends the session after the current turn
    pub fn stop(&self) {
        info!("Stop requested");
        self.stop.request_stop();
    }

    pub fn current_turn(&self) -> u64 {
        self.context.clock().current_turn()
    }

    pub fn clock(&self) -> &Arc<TurnClock> {
        self.context.clock()
    }

    pub async fn client_count(&self) -> usize {
        self.context.clients.read().await.len()
    }

    pub async fn player_nicks(&self) -> Vec<String> {
        let world = self.context.world.read().await;
        world.players().map(|p| p.nick.clone()).collect()
    }

    /// Changes the simulation rate; the next turn's budget follows it
    pub async fn set_turns_per_second(&self, rate: f64) -> Result<(), ServerError> {
        let mut world = self.context.world.write().await;
        let kind = world.set_turns_per_second(rate)?;
        self.context.notifier.enqueue(kind)?;
        Ok(())
    }

    /// Adds a map light and returns its generated name
    pub async fn add_light(&self, position: Position, diffuse: [f64; 3]) -> Result<String, ServerError> {
        let mut world = self.context.world.write().await;
        let kind = world.add_light(position, diffuse);
        let name = world
            .lights()
            .last()
            .map(|light| light.name.clone())
            .unwrap_or_default();
        self.context.notifier.enqueue(kind)?;
        Ok(name)
    }

    pub async fn remove_light(&self, name: &str) -> Result<(), ServerError> {
        let mut world = self.context.world.write().await;
        let kind = world.remove_light(name)?;
        self.context.notifier.enqueue(kind)?;
        Ok(())
    }

    /// Sends a chat line from the server to every client
    pub async fn announce(&self, message: &str) -> Result<(), ServerError> {
        self.context.chat.write().await.server_info(message);
        self.context.notifier.enqueue(NotificationKind::Chat {
            nick: SERVER_NICK.to_string(),
            message: message.to_string(),
        })?;
        Ok(())
    }

    pub async fn chat_messages(&self) -> Vec<ChatMessage> {
        self.context.chat.read().await.messages().cloned().collect()
    }
}
