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
use std::sync::Weak;

use tracing::trace;

use crate::playsync::CancelHandle;

use super::{message::Message, ControlContext, MONITOR_INTERVAL};

/// Publishes `dmx_update` every monitor interval until cancelled. Updates that don't fit in
/// the outbound queue are dropped.
pub(super) fn spawn(ctx: Weak<ControlContext>, cancel: CancelHandle) {
    tokio::spawn(async move {
        loop {
            if cancel.sleep(MONITOR_INTERVAL).await {
                return;
            }
            let Some(ctx) = ctx.upgrade() else {
                return;
            };
            let Ok(state) = ctx.dmx_state() else {
                continue;
            };
            if !ctx.try_broadcast(Message::new("dmx_update", state)) {
                trace!("Outbound queue full, dropping DMX update");
            }
        }
    });
}
