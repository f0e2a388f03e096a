use crate::common::model::{Command, CommandRequest};
use crate::errors::{QueueError, Result};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::sync::mpsc::{Receiver, Sender, channel};

/// In-process queues between the gateway session and the controller.
///
/// Flow:
/// 1. Request queue: session receive loop -> controller dispatch loop
/// 2. Command queue: controller jobs -> session writer -> gateway
///
/// Receivers sit behind a mutex so the channel can be cloned freely; each
/// queue has exactly one consumer holding the lock while it runs. The command
/// queue outlives a gateway session, so commands produced while reconnecting
/// are delivered by the next session. Commands a writer failed to send are
/// parked in a retry slot and go out before anything else.
pub struct Channel {
    pub request_sender: Sender<CommandRequest>,
    pub request_receiver: Arc<Mutex<Receiver<CommandRequest>>>,

    pub command_sender: Sender<Command>,
    pub command_receiver: Arc<Mutex<Receiver<Command>>>,
    command_retry: Arc<Mutex<VecDeque<Command>>>,
}

impl Clone for Channel {
    fn clone(&self) -> Self {
        Channel {
            request_sender: self.request_sender.clone(),
            request_receiver: self.request_receiver.clone(),

            command_sender: self.command_sender.clone(),
            command_receiver: self.command_receiver.clone(),
            command_retry: self.command_retry.clone(),
        }
    }
}

impl Channel {
    pub fn new(request_capacity: usize, command_capacity: usize) -> Self {
        let (request_sender, request_receiver) = channel(request_capacity.max(1));
        let (command_sender, command_receiver) = channel(command_capacity.max(1));

        Channel {
            request_sender,
            request_receiver: Arc::new(Mutex::new(request_receiver)),

            command_sender,
            command_receiver: Arc::new(Mutex::new(command_receiver)),
            command_retry: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    pub async fn push_request(&self, request: CommandRequest) -> Result<()> {
        self.request_sender
            .send(request)
            .await
            .map_err(|_| QueueError::Closed("request".to_string()).into())
    }

    pub async fn push_command(&self, command: Command) -> Result<()> {
        self.command_sender
            .send(command)
            .await
            .map_err(|_| QueueError::Closed("command".to_string()).into())
    }

    /// Parks a command that could not be delivered.
    pub async fn retry_command(&self, command: Command) {
        self.command_retry.lock().await.push_back(command);
    }

    /// Oldest parked command, if any.
    pub async fn take_retry(&self) -> Option<Command> {
        self.command_retry.lock().await.pop_front()
    }
}
