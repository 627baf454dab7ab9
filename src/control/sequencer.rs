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
use std::{collections::HashMap, sync::Arc, time::Duration};

use serde_json::json;
use tracing::{error, span, warn, Instrument, Level};

use crate::{
    dmx::{FadeCurve, Transmitter, FADE_TICK},
    playsync::CancelHandle,
};

use super::{message::Message, ControlContext, SHOW_LOOP_PAUSE};

/// A snapshot of a show, taken when it is launched.
pub(super) struct Sequence {
    pub show_id: String,
    pub steps: Vec<SequenceStep>,
    pub loop_show: bool,
}

pub(super) struct SequenceStep {
    pub channels: HashMap<usize, u8>,
    pub delay: Duration,
    pub fade: Duration,
}

/// Launches the sequence. When it ends, however it ends, the run state is released and
/// `show_stopped` goes out.
pub(super) fn spawn(
    ctx: Arc<ControlContext>,
    generation: u64,
    sequence: Sequence,
    cancel: CancelHandle,
) {
    let span = span!(Level::INFO, "show", show_id = %sequence.show_id, generation);
    tokio::spawn(
        async move {
            let show_id = sequence.show_id.clone();
            let handle = tokio::spawn(
                run(ctx.clone(), generation, sequence, cancel).in_current_span(),
            );
            if let Err(e) = handle.await {
                error!(err = %e, "Show sequence failed");
            }
            ctx.finish_show(generation, &show_id).await;
        }
        .instrument(span),
    );
}

async fn run(ctx: Arc<ControlContext>, generation: u64, sequence: Sequence, cancel: CancelHandle) {
    let total = sequence.steps.len();
    loop {
        for (index, step) in sequence.steps.iter().enumerate() {
            if cancel.is_cancelled() || !ctx.set_show_step(generation, index) {
                return;
            }
            let Some(transmitter) = ctx.transmitter() else {
                warn!("DMX transmitter went away");
                return;
            };

            // Every write is refused once the run is cancelled, so a preempted step never
            // lands on top of whatever preempted it.
            match transmitter.blackout_unless_cancelled(&cancel) {
                Ok(true) => {}
                Ok(false) => return,
                Err(e) => warn!(err = %e, step = index, "Error during blackout"),
            }

            if !step.fade.is_zero() {
                if let Err(e) = transmitter.fade_channels_unless_cancelled(
                    step.channels.clone(),
                    step.fade,
                    FadeCurve::Linear,
                    &cancel,
                ) {
                    warn!(err = %e, step = index, "Fade failed, fading by hand");
                    manual_fade(&transmitter, &step.channels, step.fade, &cancel).await;
                }
            } else {
                match transmitter.set_channels_unless_cancelled(&step.channels, &cancel) {
                    Ok(true) => {}
                    Ok(false) => return,
                    Err(e) => warn!(err = %e, step = index, "Error setting channels"),
                }
            }

            if !ctx.is_current_show(generation) {
                return;
            }
            ctx.broadcast(Message::new(
                "show_step",
                json!({ "show_id": sequence.show_id, "step": index, "total": total }),
            ))
            .await;

            if cancel.sleep(step.delay).await {
                return;
            }
        }

        if !sequence.loop_show || cancel.sleep(SHOW_LOOP_PAUSE).await {
            return;
        }
    }
}

/// Linear fade from the current buffer to the targets, one write per fade tick.
async fn manual_fade(
    transmitter: &Transmitter,
    targets: &HashMap<usize, u8>,
    fade: Duration,
    cancel: &CancelHandle,
) {
    let start = match transmitter.get_all_channels() {
        Ok(channels) => channels,
        Err(_) => {
            let _ = transmitter.set_channels_unless_cancelled(targets, cancel);
            return;
        }
    };

    let steps = (fade.as_millis() / FADE_TICK.as_millis()).max(1) as u32;
    for step in 0..=steps {
        if cancel.is_cancelled() {
            return;
        }
        let progress = f64::from(step) / f64::from(steps);
        let values: HashMap<usize, u8> = targets
            .iter()
            .map(|(channel, target)| {
                let from = start[channel - 1];
                (*channel, FadeCurve::Linear.interpolate(from, *target, progress))
            })
            .collect();
        match transmitter.set_channels_unless_cancelled(&values, cancel) {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                warn!(err = %e, "Error during fade");
                return;
            }
        }
        if step < steps && cancel.sleep(FADE_TICK).await {
            return;
        }
    }
}
