use crate::db::repositories::log_repository::LogUpdate;
use crate::models::log_entry::LogEntry;
use crate::plugins::LogSubscriber;
use actix::prelude::*;
use actix_web_actors::ws;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;
use uuid::Uuid;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(45);

#[derive(Message)]
#[rtype(result = "()")]
struct Relay(String);

/// Registry of connected log-tail sockets, fed by `LoggingPlugin` through the
/// `LogSubscriber` callback surface. Broadcasting is fire-and-forget: a
/// socket that has gone away is pruned lazily on its own `stopped` hook
/// rather than synchronously here.
pub struct LogTailBroadcaster {
    sessions: DashMap<Uuid, Addr<LogTailWs>>,
}

impl LogTailBroadcaster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { sessions: DashMap::new() })
    }

    fn register(&self, id: Uuid, addr: Addr<LogTailWs>) {
        self.sessions.insert(id, addr);
    }

    fn unregister(&self, id: Uuid) {
        self.sessions.remove(&id);
    }

    fn broadcast(&self, payload: String) {
        for entry in self.sessions.iter() {
            entry.value().do_send(Relay(payload.clone()));
        }
    }
}

impl LogSubscriber for LogTailBroadcaster {
    fn on_create(&self, entry: &LogEntry) {
        let payload = serde_json::json!({ "type": "create", "entry": {
            "request_id": entry.request_id,
            "provider": entry.provider,
            "model": entry.model,
            "status": format!("{:?}", entry.status),
            "streaming": entry.streaming,
        }})
        .to_string();
        self.broadcast(payload);
    }

    fn on_update(&self, request_id: Uuid, update: &LogUpdate) {
        let payload = serde_json::json!({ "type": "update", "request_id": request_id, "status": format!("{:?}", update.status) }).to_string();
        self.broadcast(payload);
    }
}

/// One connected admin socket. Pure relay: the client sends nothing the
/// server acts on besides pings, matching the broadcaster's push-only
/// design.
pub struct LogTailWs {
    id: Uuid,
    broadcaster: Arc<LogTailBroadcaster>,
    last_heartbeat: Instant,
}

impl LogTailWs {
    pub fn new(broadcaster: Arc<LogTailBroadcaster>) -> Self {
        Self { id: Uuid::new_v4(), broadcaster, last_heartbeat: Instant::now() }
    }

    fn start_heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |actor, ctx| {
            if Instant::now().duration_since(actor.last_heartbeat) > CLIENT_TIMEOUT {
                info!(session = %actor.id, "log-tail socket timed out, closing");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }
}

impl Actor for LogTailWs {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.broadcaster.register(self.id, ctx.address());
        self.start_heartbeat(ctx);
        info!(session = %self.id, "log-tail socket connected");
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.broadcaster.unregister(self.id);
        info!(session = %self.id, "log-tail socket disconnected");
    }
}

impl Handler<Relay> for LogTailWs {
    type Result = ();

    fn handle(&mut self, msg: Relay, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for LogTailWs {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(bytes)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&bytes);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Ok(_) => {}
            Err(_) => ctx.stop(),
        }
    }
}
