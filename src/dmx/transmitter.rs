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

use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam_channel::{bounded, select, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, span, Level};

use crate::{playsync::CancelHandle, thread_priority};

use super::{
    check_channel, frame,
    line::{SerialLine, SerialPortLine},
    ChannelLimit, Error, FadeCurve, BREAK_TIME, CHANNELS, FADE_TICK, MARK_AFTER_BREAK,
    MIN_FRAME_GAP, REFRESH_INTERVAL,
};

/// Depth of the change signal. Anything past this is coalesced into the pending signal.
const CHANGE_SIGNAL_DEPTH: usize = 2;

/// Frame counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Statistics {
    pub frames_sent: u64,
    pub frame_errors: u64,
}

/// The desired universe state. Only the setters write it; the send loop reads it.
struct State {
    channels: [u8; CHANNELS],
    master_dimmer: f64,
    limits: HashMap<usize, ChannelLimit>,
}

/// Everything the background threads need.
struct Shared {
    state: RwLock<State>,
    line: Mutex<Option<Box<dyn SerialLine>>>,
    changed: Sender<()>,
    frames_sent: AtomicU64,
    frame_errors: AtomicU64,
    closed: AtomicBool,
}

impl Shared {
    /// Posts a change signal. If the queue is full a frame is already pending, so the
    /// signal is dropped.
    fn signal_change(&self) {
        let _ = self.changed.try_send(());
    }

    /// Applies an update to the state and signals the change. The update only lands if
    /// none of the guards has been cancelled; the check happens under the state lock so a
    /// cancelled writer can never write after its canceller has moved on.
    fn update(
        &self,
        guards: &[&CancelHandle],
        apply: impl FnOnce(&mut State),
    ) -> Result<bool, Error> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        {
            let mut state = self.state.write();
            if guards.iter().any(|guard| guard.is_cancelled()) {
                return Ok(false);
            }
            apply(&mut state);
        }
        self.signal_change();
        Ok(true)
    }

    /// Writes channel values, see `update`.
    fn write(&self, values: &HashMap<usize, u8>, guards: &[&CancelHandle]) -> Result<bool, Error> {
        self.update(guards, |state| {
            for (channel, value) in values {
                state.channels[channel - 1] = *value;
            }
        })
    }

    /// Sends a single frame, counting the outcome.
    fn send_frame(&self) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        match self.transmit() {
            Ok(()) => {
                self.frames_sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.frame_errors.fetch_add(1, Ordering::Relaxed);
                debug!(err = %e, "Error sending DMX frame");
            }
        }
    }

    /// Encodes the current state and puts it on the line. The state lock is only held
    /// long enough to encode the frame.
    fn transmit(&self) -> Result<(), Error> {
        let frame = {
            let state = self.state.read();
            frame::encode(&state.channels, state.master_dimmer, &state.limits)
        };
        self.transmit_frame(&frame)
    }

    /// Break, mark-after-break, frame, drain.
    fn transmit_frame(&self, frame: &[u8]) -> Result<(), Error> {
        let mut line = self.line.lock();
        let line = line.as_mut().ok_or(Error::Closed)?;

        line.send_break(BREAK_TIME)?;
        spin_sleep::sleep(MARK_AFTER_BREAK);
        line.write_frame(frame)?;
        line.drain()
    }
}

/// Owns the 512 channel buffer and the serial device, and keeps the fixtures fed with
/// frames from a dedicated thread.
pub struct Transmitter {
    device: String,
    shared: Arc<Shared>,
    /// The in-flight fade, if any. There is only ever one.
    fade: Mutex<Option<CancelHandle>>,
    /// Dropping this stops the send loop.
    stop: Mutex<Option<Sender<()>>>,
    sender_handle: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Display for Transmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DMX transmitter ({})", self.device)
    }
}

impl Transmitter {
    /// Opens the serial device and starts transmitting an all dark universe.
    pub fn open(device: &str) -> Result<Transmitter, Error> {
        let line = SerialPortLine::open(device)?;
        Transmitter::with_line(device, Box::new(line))
    }

    /// Starts a transmitter over an already opened line.
    pub fn with_line(device: &str, line: Box<dyn SerialLine>) -> Result<Transmitter, Error> {
        let (changed_tx, changed_rx) = bounded(CHANGE_SIGNAL_DEPTH);
        let (stop_tx, stop_rx) = bounded::<()>(0);

        let shared = Arc::new(Shared {
            state: RwLock::new(State {
                channels: [0; CHANNELS],
                master_dimmer: 1.0,
                limits: HashMap::new(),
            }),
            line: Mutex::new(Some(line)),
            changed: changed_tx,
            frames_sent: AtomicU64::new(0),
            frame_errors: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });

        let sender_handle = {
            let shared = shared.clone();
            let device = device.to_string();
            thread::Builder::new()
                .name("dmx-transmitter".into())
                .spawn(move || Transmitter::send_loop(device, shared, changed_rx, stop_rx))?
        };

        info!(device, "DMX transmitter started.");

        Ok(Transmitter {
            device: device.to_string(),
            shared,
            fade: Mutex::new(None),
            stop: Mutex::new(Some(stop_tx)),
            sender_handle: Mutex::new(Some(sender_handle)),
        })
    }

    /// The device this transmitter writes to.
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Sends a frame as soon as something changes, and at least every refresh interval
    /// when nothing does.
    fn send_loop(device: String, shared: Arc<Shared>, changed: Receiver<()>, stop: Receiver<()>) {
        let span = span!(Level::INFO, "dmx transmitter", device);
        let _enter = span.enter();

        thread_priority::configure_transmit_thread_priority(
            thread_priority::transmit_thread_priority(),
            thread_priority::rt_transmit_enabled(),
        );

        let mut last_frame: Option<Instant> = None;
        loop {
            select! {
                recv(stop) -> _ => return,
                recv(changed) -> signal => {
                    if signal.is_err() {
                        return;
                    }
                },
                default(REFRESH_INTERVAL) => {},
            }

            if let Some(last_frame) = last_frame {
                let since = last_frame.elapsed();
                if since < MIN_FRAME_GAP {
                    spin_sleep::sleep(MIN_FRAME_GAP - since);
                }
            }

            shared.send_frame();
            last_frame = Some(Instant::now());
        }
    }

    fn check_open(&self) -> Result<(), Error> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    /// Sets a single channel (1-512).
    pub fn set_channel(&self, channel: usize, value: u8) -> Result<(), Error> {
        check_channel(channel)?;
        self.check_open()?;
        self.shared.write(&HashMap::from([(channel, value)]), &[])?;
        Ok(())
    }

    /// Sets several channels at once. Nothing is written if any channel is out of range.
    pub fn set_channels(&self, values: &HashMap<usize, u8>) -> Result<(), Error> {
        self.check_open()?;
        for channel in values.keys() {
            check_channel(*channel)?;
        }
        self.shared.write(values, &[])?;
        Ok(())
    }

    /// Like `set_channels`, but nothing is written once `owner` has been cancelled.
    /// Returns whether the values were written.
    pub fn set_channels_unless_cancelled(
        &self,
        values: &HashMap<usize, u8>,
        owner: &CancelHandle,
    ) -> Result<bool, Error> {
        self.check_open()?;
        for channel in values.keys() {
            check_channel(*channel)?;
        }
        self.shared.write(values, &[owner])
    }

    /// Sets the master dimmer (0.0-1.0). Applied at send time, the buffer is untouched.
    pub fn set_master_dimmer(&self, value: f64) -> Result<(), Error> {
        if !(0.0..=1.0).contains(&value) {
            return Err(Error::Range(format!(
                "master dimmer must be 0.0-1.0, got {}",
                value
            )));
        }
        self.shared.state.write().master_dimmer = value;
        self.shared.signal_change();
        Ok(())
    }

    /// The current master dimmer.
    pub fn master_dimmer(&self) -> f64 {
        self.shared.state.read().master_dimmer
    }

    /// Clamps the transmitted value of a channel.
    pub fn set_channel_limit(&self, channel: usize, min: u8, max: u8) -> Result<(), Error> {
        check_channel(channel)?;
        let limit = ChannelLimit::new(min, max)?;
        self.shared.state.write().limits.insert(channel, limit);
        self.shared.signal_change();
        Ok(())
    }

    /// Removes a channel limit.
    pub fn remove_channel_limit(&self, channel: usize) -> Result<(), Error> {
        check_channel(channel)?;
        self.shared.state.write().limits.remove(&channel);
        self.shared.signal_change();
        Ok(())
    }

    /// The limit on a channel, if there is one.
    pub fn channel_limit(&self, channel: usize) -> Option<ChannelLimit> {
        self.shared.state.read().limits.get(&channel).copied()
    }

    /// Cancels the in-flight fade, if any.
    fn cancel_fade(&self) {
        if let Some(fade) = self.fade.lock().take() {
            fade.cancel();
        }
    }

    /// Cancels any fade and zeroes every channel.
    pub fn blackout(&self) -> Result<(), Error> {
        self.blackout_guarded(None).map(|_| ())
    }

    /// Like `blackout`, but nothing happens once `owner` has been cancelled. Returns
    /// whether the blackout happened.
    pub fn blackout_unless_cancelled(&self, owner: &CancelHandle) -> Result<bool, Error> {
        self.blackout_guarded(Some(owner))
    }

    fn blackout_guarded(&self, owner: Option<&CancelHandle>) -> Result<bool, Error> {
        self.check_open()?;
        if owner.is_some_and(|owner| owner.is_cancelled()) {
            return Ok(false);
        }
        self.cancel_fade();
        let guards: Vec<&CancelHandle> = owner.into_iter().collect();
        self.shared
            .update(&guards, |state| state.channels = [0; CHANNELS])
    }

    /// Fades every channel to zero.
    pub fn blackout_with_fade(&self, duration: Duration, curve: FadeCurve) -> Result<(), Error> {
        let targets: HashMap<usize, u8> = (1..=CHANNELS).map(|channel| (channel, 0)).collect();
        self.fade_channels(targets, duration, curve)
    }

    /// Fades the target channels from their current values over the given duration. Any
    /// fade already in flight is cancelled first.
    pub fn fade_channels(
        &self,
        targets: HashMap<usize, u8>,
        duration: Duration,
        curve: FadeCurve,
    ) -> Result<(), Error> {
        self.start_fade(targets, duration, curve, None)
    }

    /// Like `fade_channels`, but the fade stops writing as soon as `owner` is cancelled.
    pub fn fade_channels_unless_cancelled(
        &self,
        targets: HashMap<usize, u8>,
        duration: Duration,
        curve: FadeCurve,
        owner: &CancelHandle,
    ) -> Result<(), Error> {
        self.start_fade(targets, duration, curve, Some(owner.clone()))
    }

    fn start_fade(
        &self,
        targets: HashMap<usize, u8>,
        duration: Duration,
        curve: FadeCurve,
        owner: Option<CancelHandle>,
    ) -> Result<(), Error> {
        self.check_open()?;
        for channel in targets.keys() {
            check_channel(*channel)?;
        }
        if owner.as_ref().is_some_and(|owner| owner.is_cancelled()) {
            return Ok(());
        }

        let mut fade = self.fade.lock();
        if let Some(previous) = fade.take() {
            previous.cancel();
        }

        if duration.is_zero() {
            let guards: Vec<&CancelHandle> = owner.iter().collect();
            self.shared.write(&targets, &guards)?;
            return Ok(());
        }

        let cancel_handle = CancelHandle::new();
        *fade = Some(cancel_handle.clone());

        let start: HashMap<usize, u8> = {
            let state = self.shared.state.read();
            targets
                .keys()
                .map(|channel| (*channel, state.channels[channel - 1]))
                .collect()
        };

        let shared = self.shared.clone();
        thread::Builder::new()
            .name("dmx-fade".into())
            .spawn(move || {
                Transmitter::run_fade(
                    shared,
                    start,
                    targets,
                    duration,
                    curve,
                    cancel_handle,
                    owner,
                )
            })?;

        Ok(())
    }

    /// Steps a fade every tick until it finishes or either handle is cancelled.
    fn run_fade(
        shared: Arc<Shared>,
        start: HashMap<usize, u8>,
        targets: HashMap<usize, u8>,
        duration: Duration,
        curve: FadeCurve,
        cancel_handle: CancelHandle,
        owner: Option<CancelHandle>,
    ) {
        let guards: Vec<&CancelHandle> = std::iter::once(&cancel_handle)
            .chain(owner.as_ref())
            .collect();
        let began = Instant::now();
        loop {
            if cancel_handle.wait_timeout(FADE_TICK) {
                return;
            }

            let elapsed = began.elapsed();
            if elapsed >= duration {
                let _ = shared.write(&targets, &guards);
                return;
            }

            let progress = elapsed.as_secs_f64() / duration.as_secs_f64();
            let values: HashMap<usize, u8> = targets
                .iter()
                .map(|(channel, target)| {
                    let from = start.get(channel).copied().unwrap_or_default();
                    (*channel, curve.interpolate(from, *target, progress))
                })
                .collect();

            match shared.write(&values, &guards) {
                Ok(true) => {}
                Ok(false) | Err(_) => return,
            }
        }
    }

    /// A copy of the raw channel buffer (before the dimmer and limits), channel 1 first.
    pub fn get_all_channels(&self) -> Result<[u8; CHANNELS], Error> {
        self.check_open()?;
        Ok(self.shared.state.read().channels)
    }

    pub fn statistics(&self) -> Statistics {
        Statistics {
            frames_sent: self.shared.frames_sent.load(Ordering::Relaxed),
            frame_errors: self.shared.frame_errors.load(Ordering::Relaxed),
        }
    }

    pub fn reset_statistics(&self) {
        self.shared.frames_sent.store(0, Ordering::Relaxed);
        self.shared.frame_errors.store(0, Ordering::Relaxed);
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Stops the send loop, sends one last dark frame and releases the device. Closing
    /// more than once is a no-op.
    pub fn close(&self) -> Result<(), Error> {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.cancel_fade();

        // Dropping the stop sender wakes the loop.
        self.stop.lock().take();
        if let Some(handle) = self.sender_handle.lock().take() {
            if handle.join().is_err() {
                debug!("DMX send loop panicked");
            }
        }

        // Limits and the dimmer don't apply to the last frame, the rig is left fully dark.
        self.shared.state.write().channels = [0; CHANNELS];
        let result = self.shared.transmit_frame(&frame::dark());

        self.shared.line.lock().take();
        info!(device = self.device, "DMX transmitter closed.");
        result
    }
}

impl Drop for Transmitter {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;
    use std::time::{Duration, Instant};

    use crate::{
        dmx::{
            line::{LineEvent, MockLine},
            Error, FadeCurve, CHANNELS, FRAME_SIZE, REFRESH_INTERVAL,
        },
        playsync::CancelHandle,
        testutil::eventually,
    };

    use super::Transmitter;

    fn new_transmitter() -> (Transmitter, MockLine) {
        let line = MockLine::new();
        let transmitter =
            Transmitter::with_line("mock", Box::new(line.clone())).expect("transmitter starts");
        (transmitter, line)
    }

    #[test]
    fn test_starts_dark() {
        let (transmitter, line) = new_transmitter();
        assert_eq!(transmitter.get_all_channels().unwrap(), [0u8; CHANNELS]);

        // Even with no changes the idle refresh keeps frames coming.
        eventually(|| line.frame_count() >= 3, "Idle refresh never sent frames");
        let frame = line.last_frame().unwrap();
        assert_eq!(frame.len(), FRAME_SIZE);
        assert!(frame.iter().all(|value| *value == 0));
    }

    #[test]
    fn test_frame_sequence() {
        let (transmitter, line) = new_transmitter();
        eventually(|| line.frame_count() >= 1, "No frame was sent");
        transmitter.close().unwrap();

        let events = line.events();
        let first_frame = events
            .iter()
            .position(|event| matches!(event, LineEvent::Frame(_)))
            .unwrap();
        assert_eq!(events[first_frame - 1], LineEvent::Break);
        assert_eq!(events[first_frame + 1], LineEvent::Drain);
    }

    #[test]
    fn test_set_channel_range() {
        let (transmitter, _line) = new_transmitter();

        for channel in [0, CHANNELS + 1, 10_000] {
            assert!(matches!(
                transmitter.set_channel(channel, 1),
                Err(Error::Range(_))
            ));
        }
        for channel in [1, 256, CHANNELS] {
            transmitter.set_channel(channel, 77).unwrap();
            assert_eq!(transmitter.get_all_channels().unwrap()[channel - 1], 77);
        }
    }

    #[test]
    fn test_set_channels_is_all_or_nothing() {
        let (transmitter, _line) = new_transmitter();

        let values = HashMap::from([(1, 10), (2, 20), (600, 30)]);
        assert!(matches!(
            transmitter.set_channels(&values),
            Err(Error::Range(_))
        ));
        assert_eq!(transmitter.get_all_channels().unwrap(), [0u8; CHANNELS]);

        let values = HashMap::from([(1, 10), (512, 20)]);
        transmitter.set_channels(&values).unwrap();
        let channels = transmitter.get_all_channels().unwrap();
        assert_eq!(channels[0], 10);
        assert_eq!(channels[511], 20);
    }

    #[test]
    fn test_dimmer_and_limits_applied_on_the_wire() {
        let (transmitter, line) = new_transmitter();

        assert!(matches!(
            transmitter.set_master_dimmer(1.5),
            Err(Error::Range(_))
        ));
        assert!(matches!(
            transmitter.set_master_dimmer(-0.1),
            Err(Error::Range(_))
        ));
        assert!(matches!(
            transmitter.set_channel_limit(3, 200, 100),
            Err(Error::Range(_))
        ));
        assert!(matches!(
            transmitter.set_channel_limit(0, 0, 100),
            Err(Error::Range(_))
        ));

        transmitter
            .set_channels(&HashMap::from([(1, 255), (2, 200), (3, 10)]))
            .unwrap();
        transmitter.set_master_dimmer(0.5).unwrap();
        transmitter.set_channel_limit(2, 0, 50).unwrap();
        transmitter.set_channel_limit(3, 20, 255).unwrap();

        eventually(
            || {
                line.last_frame()
                    .is_some_and(|frame| frame[1] == 128 && frame[2] == 50 && frame[3] == 20)
            },
            "Dimmer and limits never reached the wire",
        );

        // The raw buffer is untouched by the dimmer.
        let channels = transmitter.get_all_channels().unwrap();
        assert_eq!(&channels[0..3], &[255, 200, 10]);
        assert_eq!(transmitter.master_dimmer(), 0.5);

        transmitter.remove_channel_limit(2).unwrap();
        assert!(transmitter.channel_limit(2).is_none());
        eventually(
            || line.last_frame().is_some_and(|frame| frame[2] == 100),
            "Removing a limit never reached the wire",
        );
    }

    #[test]
    fn test_fade_reaches_target() {
        let (transmitter, _line) = new_transmitter();
        transmitter.set_channel(1, 200).unwrap();

        transmitter
            .fade_channels(
                HashMap::from([(1, 0), (2, 255)]),
                Duration::from_millis(200),
                FadeCurve::Linear,
            )
            .unwrap();

        // Intermediate values stay between start and target.
        for _ in 0..8 {
            let channels = transmitter.get_all_channels().unwrap();
            assert!(channels[0] <= 200);
            std::thread::sleep(Duration::from_millis(20));
        }

        eventually(
            || {
                let channels = transmitter.get_all_channels().unwrap();
                channels[0] == 0 && channels[1] == 255
            },
            "Fade never reached its targets",
        );
    }

    #[test]
    fn test_zero_duration_fade_snaps() {
        let (transmitter, _line) = new_transmitter();
        transmitter
            .fade_channels(HashMap::from([(5, 99)]), Duration::ZERO, FadeCurve::Sine)
            .unwrap();
        assert_eq!(transmitter.get_all_channels().unwrap()[4], 99);
    }

    #[test]
    fn test_new_fade_stops_previous() {
        let (transmitter, _line) = new_transmitter();

        transmitter
            .fade_channels(
                HashMap::from([(1, 255)]),
                Duration::from_secs(2),
                FadeCurve::Linear,
            )
            .unwrap();
        eventually(
            || transmitter.get_all_channels().unwrap()[0] > 0,
            "First fade never started",
        );

        transmitter
            .fade_channels(
                HashMap::from([(2, 100)]),
                Duration::from_millis(50),
                FadeCurve::Linear,
            )
            .unwrap();

        let frozen = transmitter.get_all_channels().unwrap()[0];
        eventually(
            || transmitter.get_all_channels().unwrap()[1] == 100,
            "Second fade never finished",
        );
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(transmitter.get_all_channels().unwrap()[0], frozen);
    }

    #[test]
    fn test_blackout_cancels_fade() {
        let (transmitter, _line) = new_transmitter();
        transmitter.set_channel(10, 50).unwrap();
        transmitter
            .fade_channels(
                HashMap::from([(1, 255)]),
                Duration::from_secs(2),
                FadeCurve::Quadratic,
            )
            .unwrap();

        transmitter.blackout().unwrap();
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(transmitter.get_all_channels().unwrap(), [0u8; CHANNELS]);
    }

    #[test]
    fn test_blackout_with_fade() {
        let (transmitter, _line) = new_transmitter();
        transmitter
            .set_channels(&HashMap::from([(1, 255), (512, 255)]))
            .unwrap();
        transmitter
            .blackout_with_fade(Duration::from_millis(60), FadeCurve::Cubic)
            .unwrap();
        eventually(
            || transmitter.get_all_channels().unwrap() == [0u8; CHANNELS],
            "Fade to black never finished",
        );
    }

    #[test]
    fn test_frame_errors_are_counted() {
        let (transmitter, line) = new_transmitter();
        eventually(
            || transmitter.statistics().frames_sent >= 1,
            "No frame was counted",
        );

        line.set_fail_writes(true);
        eventually(
            || transmitter.statistics().frame_errors >= 2,
            "Write failures were never counted",
        );

        line.set_fail_writes(false);
        line.set_fail_breaks(true);
        let errors = transmitter.statistics().frame_errors;
        eventually(
            || transmitter.statistics().frame_errors > errors,
            "Break failures were never counted",
        );

        line.set_fail_breaks(false);
        transmitter.reset_statistics();
        let statistics = transmitter.statistics();
        assert!(statistics.frame_errors <= 1);
        assert!(statistics.frames_sent <= 2);
    }

    #[test]
    fn test_close() {
        let (transmitter, line) = new_transmitter();
        transmitter
            .set_channels(&HashMap::from([(1, 255), (300, 4)]))
            .unwrap();
        transmitter.set_master_dimmer(0.8).unwrap();
        eventually(
            || line.last_frame().is_some_and(|frame| frame[1] > 0),
            "Channels never reached the wire",
        );

        transmitter.close().unwrap();
        assert!(transmitter.is_closed());

        let last = line.last_frame().unwrap();
        assert_eq!(last.len(), FRAME_SIZE);
        assert!(last.iter().all(|value| *value == 0));

        // Nothing else is sent once closed.
        let count = line.frame_count();
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(line.frame_count(), count);

        assert!(matches!(transmitter.set_channel(1, 1), Err(Error::Closed)));
        assert!(matches!(transmitter.blackout(), Err(Error::Closed)));
        assert!(matches!(transmitter.get_all_channels(), Err(Error::Closed)));
        assert!(matches!(
            transmitter.fade_channels(HashMap::new(), Duration::ZERO, FadeCurve::Linear),
            Err(Error::Closed)
        ));

        // Closing again is fine.
        transmitter.close().unwrap();
    }

    #[test]
    fn test_close_ignores_limits_and_dimmer() {
        let (transmitter, line) = new_transmitter();
        transmitter.set_channel_limit(7, 50, 255).unwrap();
        transmitter.set_master_dimmer(0.5).unwrap();
        eventually(
            || line.last_frame().is_some_and(|frame| frame[7] == 50),
            "Limit floor never reached the wire",
        );

        transmitter.close().unwrap();

        let last = line.last_frame().unwrap();
        assert_eq!(last.len(), FRAME_SIZE);
        assert!(last.iter().all(|value| *value == 0));
    }

    #[test]
    fn test_rapid_writes_are_coalesced() {
        let (transmitter, line) = new_transmitter();
        eventually(|| line.frame_count() >= 1, "No frame was sent");

        let writes = 1000;
        let before = line.frame_count();
        for i in 0..writes {
            transmitter.set_channel(1, (i % 200) as u8).unwrap();
        }
        transmitter.set_channel(1, 255).unwrap();
        let written = Instant::now();

        loop {
            if line.last_frame().is_some_and(|frame| frame[1] == 255) {
                break;
            }
            assert!(
                written.elapsed() < REFRESH_INTERVAL,
                "Final value was not sent promptly"
            );
            std::thread::sleep(Duration::from_millis(1));
        }

        let sent = line.frame_count() - before;
        assert!(
            sent < writes / 10,
            "{} frames were sent for {} writes",
            sent,
            writes
        );
    }

    #[test]
    fn test_cancelled_owner_cannot_write() {
        let (transmitter, _line) = new_transmitter();
        let owner = CancelHandle::new();

        assert!(transmitter
            .set_channels_unless_cancelled(&HashMap::from([(1, 10)]), &owner)
            .unwrap());
        assert_eq!(transmitter.get_all_channels().unwrap()[0], 10);

        owner.cancel();
        transmitter.set_channel(2, 99).unwrap();

        assert!(!transmitter
            .set_channels_unless_cancelled(&HashMap::from([(1, 20)]), &owner)
            .unwrap());
        assert!(!transmitter.blackout_unless_cancelled(&owner).unwrap());
        transmitter
            .fade_channels_unless_cancelled(
                HashMap::from([(3, 255)]),
                Duration::ZERO,
                FadeCurve::Linear,
                &owner,
            )
            .unwrap();

        let channels = transmitter.get_all_channels().unwrap();
        assert_eq!(&channels[0..3], &[10, 99, 0]);
    }

    #[test]
    fn test_cancelling_owner_stops_fade() {
        let (transmitter, _line) = new_transmitter();
        let owner = CancelHandle::new();

        transmitter
            .fade_channels_unless_cancelled(
                HashMap::from([(1, 255)]),
                Duration::from_secs(2),
                FadeCurve::Linear,
                &owner,
            )
            .unwrap();
        eventually(
            || transmitter.get_all_channels().unwrap()[0] > 0,
            "Fade never started",
        );

        owner.cancel();
        let frozen = transmitter.get_all_channels().unwrap()[0];
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(transmitter.get_all_channels().unwrap()[0], frozen);
    }

    #[test]
    fn test_close_attempts_final_frame_even_on_failure() {
        let (transmitter, line) = new_transmitter();
        line.set_fail_writes(true);
        assert!(transmitter.close().is_err());
        assert!(transmitter.is_closed());
    }
}
