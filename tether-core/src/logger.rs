//! Packet logger: observe-only collaborator that traces every packet per direction.

use std::sync::Arc;

use serde_json::Value;

use crate::protocol::PacketMeta;
use crate::relay::Direction;
use crate::session::{Collaborator, Session};
use crate::transform::TransformResult;

#[derive(Debug, Default, Clone, Copy)]
pub struct PacketLogger;

impl PacketLogger {
    fn observer(
        label: Arc<str>,
        direction: Direction,
    ) -> impl FnMut(&Value, &PacketMeta) -> TransformResult + Send {
        move |_fields: &Value, meta: &PacketMeta| {
            tracing::trace!(
                session = &*label,
                ?direction,
                packet = %meta.name,
                state = ?meta.state,
                "packet"
            );
            TransformResult::Pass
        }
    }
}

impl Collaborator for PacketLogger {
    fn attach(&self, session: &mut Session) {
        let label: Arc<str> = Arc::from(session.label());
        session.add_outgoing_transformer(Self::observer(label.clone(), Direction::Outgoing));
        session.add_incoming_transformer(Self::observer(label.clone(), Direction::Incoming));
        session.on_destroy(move |id| tracing::trace!(session = &*label, %id, "packet logger detached"));
    }
}
