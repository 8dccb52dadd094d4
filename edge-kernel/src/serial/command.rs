/**
 * COMMAND CHANNEL - Discipline une-commande-en-vol
 *
 * La carte traite une commande à la fois et répond "ACK" quand elle est
 * prête. Machine à états pure (aucune I/O) : chaque transition retourne la
 * commande à transmettre maintenant, le superviseur fait l'écriture.
 *
 *   Ready --submit(c)--> Busy      (c transmise)
 *   Busy  --submit(c)--> Busy      (c en file)
 *   Busy  --ACK--------> Ready     (file vide)
 *   Busy  --ACK--------> Busy      (tête de file transmise)
 *
 * Pas de timeout : sans ACK le canal reste Busy jusqu'à reconnexion.
 */

use serde::Serialize;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelState {
    Ready,
    Busy,
}

#[derive(Debug)]
pub struct CommandChannel {
    state: ChannelState,
    queue: VecDeque<String>,
}

impl CommandChannel {
    pub fn new() -> Self {
        Self {
            state: ChannelState::Ready,
            queue: VecDeque::new(),
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Some(cmd) : à transmettre immédiatement ; None : mise en file
    pub fn submit(&mut self, command: String) -> Option<String> {
        match self.state {
            ChannelState::Ready => {
                self.state = ChannelState::Busy;
                Some(command)
            }
            ChannelState::Busy => {
                self.queue.push_back(command);
                None
            }
        }
    }

    /// ACK reçu : la tête de file éventuelle part, sinon retour à Ready
    pub fn acknowledge(&mut self) -> Option<String> {
        match self.queue.pop_front() {
            Some(next) => {
                self.state = ChannelState::Busy;
                Some(next)
            }
            None => {
                self.state = ChannelState::Ready;
                None
            }
        }
    }

    /// L'écriture de la commande en vol a échoué : la carte n'enverra pas d'ACK.
    /// Même transition qu'un ACK, la tête de file éventuelle est à transmettre.
    pub fn transmit_failed(&mut self) -> Option<String> {
        self.acknowledge()
    }
}

impl Default for CommandChannel {
    fn default() -> Self {
        Self::new()
    }
}
