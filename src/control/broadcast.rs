// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::mpsc;
use tracing::{debug, span, warn, Instrument, Level};

use super::{message::Message, session::SessionRegistry};

/// Drains the outbound queue, writing each message to every session. A session whose
/// write fails is dropped from the registry.
pub(super) fn spawn(sessions: Arc<SessionRegistry>, mut outbound: mpsc::Receiver<Message>) {
    tokio::spawn(
        async move {
            while let Some(message) = outbound.recv().await {
                let text = message.to_text();
                let targets = sessions.snapshot();
                let results = join_all(
                    targets
                        .iter()
                        .map(|session| session.send_text(text.clone())),
                )
                .await;

                for (session, result) in targets.iter().zip(results) {
                    if let Err(e) = result {
                        warn!(session = session.id(), err = %e, "Dropping session after failed write");
                        if sessions.remove(session.id()).is_some() {
                            session.close().await;
                        }
                    }
                }
            }
            debug!("Outbound queue closed.");
        }
        .instrument(span!(Level::INFO, "broadcaster")),
    );
}
