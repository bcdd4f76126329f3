//! Command relay
//!
//! Inbound messages from the control surface are `{"event": name}` objects.
//! A message without an event is a connectivity ping. Messages from any
//! sender other than our own extension are dropped without a reply.
//! Commands that arrive while the page is navigating are held and released,
//! in arrival order, once the new document is ready.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PageCommand {
    #[serde(alias = "ts-target-articles")]
    EnterTargeting,
    ExitTargeting,
    ToggleTargeting,
    #[serde(alias = "ts-menu-toggle")]
    TogglePanel,
}

impl PageCommand {
    pub const ALL: [PageCommand; 4] = [
        PageCommand::EnterTargeting,
        PageCommand::ExitTargeting,
        PageCommand::ToggleTargeting,
        PageCommand::TogglePanel,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PageCommand::EnterTargeting => "enter-targeting",
            PageCommand::ExitTargeting => "exit-targeting",
            PageCommand::ToggleTargeting => "toggle-targeting",
            PageCommand::TogglePanel => "toggle-panel",
        }
    }
}

impl fmt::Display for PageCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("unknown page command `{0}`")]
pub struct UnknownCommand(pub String);

impl FromStr for PageCommand {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "enter-targeting" | "ts-target-articles" => Ok(PageCommand::EnterTargeting),
            "exit-targeting" => Ok(PageCommand::ExitTargeting),
            "toggle-targeting" => Ok(PageCommand::ToggleTargeting),
            "toggle-panel" | "ts-menu-toggle" => Ok(PageCommand::TogglePanel),
            other => Err(UnknownCommand(other.to_string())),
        }
    }
}

/// Wire shape of an inbound message
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<PageCommand>,
}

impl InboundMessage {
    pub fn ping() -> Self {
        Self { event: None }
    }

    pub fn command(command: PageCommand) -> Self {
        Self {
            event: Some(command),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Acknowledgement sent back to the control surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayReply {
    pub success: bool,
}

/// Identity of a message sender
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SenderId(pub String);

impl SenderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for SenderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the relay decided to do with one message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Apply now
    Apply(PageCommand),
    /// Held until navigation completes
    Queued(PageCommand),
    /// Connectivity check; acknowledge and do nothing
    Ping,
    /// Foreign sender; no reply
    Dropped,
}

#[derive(Debug)]
pub struct CommandRelay {
    own_id: SenderId,
    navigating: bool,
    queue: VecDeque<PageCommand>,
}

impl CommandRelay {
    pub fn new(own_id: SenderId) -> Self {
        Self {
            own_id,
            navigating: false,
            queue: VecDeque::new(),
        }
    }

    pub fn own_id(&self) -> &SenderId {
        &self.own_id
    }

    pub fn is_navigating(&self) -> bool {
        self.navigating
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn receive(&mut self, sender: &SenderId, message: &InboundMessage) -> Delivery {
        if *sender != self.own_id {
            trace!(%sender, "dropping message from foreign sender");
            return Delivery::Dropped;
        }
        match message.event {
            None => Delivery::Ping,
            Some(command) if self.navigating => {
                debug!(%command, "queueing command during navigation");
                self.queue.push_back(command);
                Delivery::Queued(command)
            }
            Some(command) => Delivery::Apply(command),
        }
    }

    /// The current document is going away
    pub fn begin_navigation(&mut self) {
        self.navigating = true;
    }

    /// The new document is ready. Returns commands held meanwhile, oldest first.
    pub fn complete_navigation(&mut self) -> Vec<PageCommand> {
        self.navigating = false;
        self.queue.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relay() -> CommandRelay {
        CommandRelay::new(SenderId::new("postshot"))
    }

    #[test]
    fn decodes_event_names_and_aliases() {
        let parse = |json: &str| InboundMessage::from_json(json).unwrap().event;
        assert_eq!(
            parse(r#"{"event":"enter-targeting"}"#),
            Some(PageCommand::EnterTargeting)
        );
        assert_eq!(
            parse(r#"{"event":"ts-target-articles"}"#),
            Some(PageCommand::EnterTargeting)
        );
        assert_eq!(
            parse(r#"{"event":"ts-menu-toggle"}"#),
            Some(PageCommand::TogglePanel)
        );
        assert_eq!(parse("{}"), None);
        assert!(InboundMessage::from_json(r#"{"event":"explode"}"#).is_err());
        for command in PageCommand::ALL {
            assert_eq!(command.as_str().parse::<PageCommand>(), Ok(command));
            let json = InboundMessage::command(command).to_json();
            assert_eq!(InboundMessage::from_json(&json).unwrap().event, Some(command));
        }
    }

    #[test]
    fn foreign_senders_are_dropped() {
        let mut relay = relay();
        let message = InboundMessage::command(PageCommand::EnterTargeting);
        assert_eq!(
            relay.receive(&SenderId::new("someone-else"), &message),
            Delivery::Dropped
        );
        assert_eq!(relay.queued(), 0);
    }

    #[test]
    fn ping_carries_no_command() {
        let mut relay = relay();
        let own = relay.own_id().clone();
        assert_eq!(relay.receive(&own, &InboundMessage::ping()), Delivery::Ping);
    }

    #[test]
    fn commands_wait_for_navigation_in_order() {
        let mut relay = relay();
        let own = relay.own_id().clone();
        relay.begin_navigation();
        for command in [PageCommand::TogglePanel, PageCommand::EnterTargeting] {
            assert_eq!(
                relay.receive(&own, &InboundMessage::command(command)),
                Delivery::Queued(command)
            );
        }
        // Pings are answered even mid-navigation
        assert_eq!(relay.receive(&own, &InboundMessage::ping()), Delivery::Ping);

        assert_eq!(
            relay.complete_navigation(),
            vec![PageCommand::TogglePanel, PageCommand::EnterTargeting]
        );
        assert_eq!(
            relay.receive(&own, &InboundMessage::command(PageCommand::ExitTargeting)),
            Delivery::Apply(PageCommand::ExitTargeting)
        );
    }
}
