//! Application callback boundary.

use tracing::info;

use super::SessionExit;
use crate::command::Command;
use crate::error::CommandError;

/// Commands produced by a handler while it processes one command.
///
/// Wire commands go to the session's outbound queue; synthetic commands are
/// dispatched back to the handler within the same iteration.
#[derive(Debug, Default)]
pub struct Outbox {
    wire: Vec<Command>,
    local: Vec<Command>,
}

impl Outbox {
    /// Queue a wire command for the peer.
    pub fn send(&mut self, command: Command) -> Result<(), CommandError> {
        if command.is_synthetic() {
            return Err(CommandError::NotWireCapable(command.kind()));
        }
        if command.is_cleared() {
            return Err(CommandError::Cleared(command.kind()));
        }
        self.wire.push(command);
        Ok(())
    }

    /// Dispatch a synthetic command locally.
    pub fn synthesize(&mut self, command: Command) -> Result<(), CommandError> {
        if !command.is_synthetic() {
            return Err(CommandError::NotSynthetic(command.kind()));
        }
        self.local.push(command);
        Ok(())
    }

    /// Nothing queued
    pub fn is_empty(&self) -> bool {
        self.wire.is_empty() && self.local.is_empty()
    }

    pub(crate) fn into_parts(self) -> (Vec<Command>, Vec<Command>) {
        (self.wire, self.local)
    }
}

/// Receives every command a session dispatches.
///
/// Any `FnMut(&Command, &mut Outbox)` closure is a handler.
pub trait SessionHandler: Send {
    /// Handle one inbound or synthesized command.
    fn on_command(&mut self, command: &Command, outbox: &mut Outbox);

    /// Called once when the session ends, after the connection is closed.
    fn on_terminated(&mut self, _exit: &SessionExit) {}
}

impl<F> SessionHandler for F
where
    F: FnMut(&Command, &mut Outbox) + Send,
{
    fn on_command(&mut self, command: &Command, outbox: &mut Outbox) {
        self(command, outbox)
    }
}

/// Logs every command and acknowledges node and tag group requests locally.
#[derive(Debug, Default, Clone, Copy)]
pub struct AckingHandler;

impl SessionHandler for AckingHandler {
    fn on_command(&mut self, command: &Command, outbox: &mut Outbox) {
        info!("{}", command);

        let ack = match *command {
            Command::NodeCreate { node_id, .. } => Command::node_create_ack(node_id),
            Command::NodeDestroy { node_id } => Command::node_destroy_ack(node_id),
            Command::TagGroupCreate {
                node_id,
                taggroup_id,
                ..
            } => Command::taggroup_create_ack(node_id, taggroup_id),
            Command::TagGroupDestroy {
                node_id,
                taggroup_id,
            } => Command::taggroup_destroy_ack(node_id, taggroup_id),
            _ => return,
        };
        let _ = outbox.synthesize(ack);
    }

    fn on_terminated(&mut self, exit: &SessionExit) {
        info!("Session ended: {:?}", exit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandKind;

    #[test]
    fn test_outbox_rejects_wrong_origin() {
        let mut outbox = Outbox::default();
        assert_eq!(
            outbox.send(Command::node_create_ack(1)),
            Err(CommandError::NotWireCapable(CommandKind::NodeCreateAck))
        );
        assert_eq!(
            outbox.synthesize(Command::node_create(1, 0, 0, 0)),
            Err(CommandError::NotSynthetic(CommandKind::NodeCreate))
        );
        assert!(outbox.is_empty());

        outbox.send(Command::node_destroy(1)).unwrap();
        outbox.synthesize(Command::node_destroy_ack(1)).unwrap();
        let (wire, local) = outbox.into_parts();
        assert_eq!(wire, vec![Command::node_destroy(1)]);
        assert_eq!(local, vec![Command::node_destroy_ack(1)]);
    }

    #[test]
    fn test_outbox_rejects_cleared() {
        let mut cmd = Command::node_destroy(1);
        cmd.destroy();
        let mut outbox = Outbox::default();
        assert!(matches!(outbox.send(cmd), Err(CommandError::Cleared(_))));
    }

    #[test]
    fn test_acking_handler() {
        let mut handler = AckingHandler;
        let mut outbox = Outbox::default();
        handler.on_command(&Command::taggroup_create(7, 3, 0), &mut outbox);
        let (wire, local) = outbox.into_parts();
        assert!(wire.is_empty());
        assert_eq!(local, vec![Command::taggroup_create_ack(7, 3)]);

        let mut outbox = Outbox::default();
        handler.on_command(&Command::tag_set_string(7, 3, 1, "x"), &mut outbox);
        assert!(outbox.is_empty());
    }

    #[test]
    fn test_closure_is_handler() {
        let mut seen = Vec::new();
        let mut handler = |cmd: &Command, _: &mut Outbox| seen.push(cmd.kind());
        handler.on_command(&Command::KeepAlive, &mut Outbox::default());
        assert_eq!(seen, vec![CommandKind::KeepAlive]);
    }
}
