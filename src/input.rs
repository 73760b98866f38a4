use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    process,
    sync::Arc,
    thread,
    time::SystemTime,
};

use anyhow::bail;
use evdev::{AbsoluteAxisType, Device, InputEventKind, Key};

use crate::{
    cmd::Cmd,
    config::{self, CommandVerb},
    math::vec2,
};

/// Capacity hint for one poll batch. The kernel's evdev ring bounds how many
/// reports can pile up between polls.
const MAX_PACKETS: usize = 20;

/// One tablet packet, in raw device units.
#[derive(Debug, Clone, Copy)]
pub struct RawSample {
    pub x: i32,
    pub y: i32,
    /// 0 means the pen does not touch the surface.
    pub pressure: i32,
    pub time: SystemTime,
}

#[derive(Debug)]
pub enum SessionEvent {
    Sample(RawSample),
    Key { key: Key, pressed: bool },
}

#[derive(Debug, Clone, Copy)]
pub struct Range {
    pub min: i32,
    pub max: i32,
}

impl Range {
    pub fn span(self) -> i32 {
        self.max - self.min
    }

    /// Normalizes a raw axis value into 0-1.
    pub fn normalize(self, value: i32) -> f32 {
        (value - self.min) as f32 / self.span() as f32
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AxisRanges {
    pub x: Range,
    pub y: Range,
    pub pressure: Range,
}

/// A session with the tablet driver.
///
/// Axis ranges are reported once at open; afterwards `poll` yields ordered,
/// possibly-empty batches of packets. Closing the session is `Drop`.
pub trait TabletSession {
    fn ranges(&self) -> AxisRanges;

    /// Appends the driver's queued events onto `out`, in arrival order.
    /// Blocks until at least one report is available.
    fn poll(&mut self, out: &mut Vec<SessionEvent>) -> anyhow::Result<()>;
}

/// [`TabletSession`] adapter for a Linux evdev device.
pub struct EvdevSession {
    device: Device,
    ranges: AxisRanges,
    // Last seen axis state, carried across reports: evdev only includes the
    // axes that changed in each report.
    x: i32,
    y: i32,
    pressure: i32,
}

impl EvdevSession {
    fn open(device: Device) -> anyhow::Result<Self> {
        let abs = device.get_abs_state()?;
        let axis = |a: AbsoluteAxisType| {
            let info = abs[usize::from(a.0)];
            Range {
                min: info.minimum,
                max: info.maximum,
            }
        };
        let ranges = AxisRanges {
            x: axis(AbsoluteAxisType::ABS_X),
            y: axis(AbsoluteAxisType::ABS_Y),
            pressure: axis(AbsoluteAxisType::ABS_PRESSURE),
        };
        if ranges.x.span() <= 0 || ranges.y.span() <= 0 || ranges.pressure.span() <= 0 {
            bail!("tablet reports degenerate axis ranges: {ranges:?}");
        }

        Ok(Self {
            device,
            ranges,
            x: 0,
            y: 0,
            pressure: 0,
        })
    }
}

impl TabletSession for EvdevSession {
    fn ranges(&self) -> AxisRanges {
        self.ranges
    }

    fn poll(&mut self, out: &mut Vec<SessionEvent>) -> anyhow::Result<()> {
        let events = self.device.fetch_events()?; // (blocks for new events)
        for event in events {
            match event.kind() {
                InputEventKind::AbsAxis(axis) => {
                    if axis == AbsoluteAxisType::ABS_X {
                        self.x = event.value();
                    } else if axis == AbsoluteAxisType::ABS_Y {
                        self.y = event.value();
                    } else if axis == AbsoluteAxisType::ABS_PRESSURE {
                        self.pressure = event.value();
                    }
                }
                InputEventKind::Key(key) => {
                    if event.value() == 2 {
                        // Key repeat.
                        continue;
                    }
                    out.push(SessionEvent::Key {
                        key,
                        pressed: event.value() == 1,
                    });
                }
                InputEventKind::Synchronization(_) => {
                    // One report = one packet.
                    out.push(SessionEvent::Sample(RawSample {
                        x: self.x,
                        y: self.y,
                        pressure: self.pressure,
                        time: event.timestamp(),
                    }));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

pub fn spawn(devices: Vec<config::Device>, send_cmd: impl Fn(Cmd) + Send + Sync + 'static) {
    thread::spawn(move || wrap(move || input_main_loop(devices, Arc::new(send_cmd))));
}

fn wrap(f: impl FnOnce() -> anyhow::Result<()>) {
    let res = catch_unwind(AssertUnwindSafe(f));
    match res {
        Ok(Ok(())) => {
            eprintln!("error: input thread exited unexpectedly");
            process::exit(1);
        }
        Ok(Err(e)) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
        Err(_panic) => {
            // Panic message and backtrace are printed by the default panic hook.
            eprintln!("input thread panicked, exiting");
            process::exit(101);
        }
    }
}

fn input_main_loop(
    mut devices: Vec<config::Device>,
    send_cmd: Arc<dyn Fn(Cmd) + Send + Sync>,
) -> anyhow::Result<()> {
    let mut handles = Vec::new();
    for (path, mut device) in evdev::enumerate() {
        let Some(name) = device.name() else { continue };

        let Some(i) = devices.iter().position(|dev| dev.name == name) else {
            continue;
        };
        let dev = devices.swap_remove(i);

        log::info!(
            "found matching input device at `{}`: {name}",
            path.display()
        );

        if dev.tablet {
            let required = [
                AbsoluteAxisType::ABS_X,
                AbsoluteAxisType::ABS_Y,
                AbsoluteAxisType::ABS_PRESSURE,
            ];
            match device.supported_absolute_axes() {
                Some(axes) if required.iter().all(|&a| axes.contains(a)) => {}
                _ => bail!("input device '{name}' is configured as the stylus but does not support X/Y/pressure absolute axes"),
            }
        }

        for key in dev.bind.keys() {
            match device.supported_keys() {
                Some(keys) if keys.contains(key.0) => {},
                _ => bail!("input device '{name}' input {key:?} is bound to an action, but the device does not have that key"),
            }
        }

        if dev.grab {
            log::info!("grabbing '{name}'");
            device.grab()?;
        }

        let send_cmd = send_cmd.clone();
        handles.push(thread::spawn(move || {
            wrap(move || device_main(device, dev, send_cmd))
        }));
    }

    for handle in handles {
        handle.join().ok();
    }

    Ok(())
}

fn device_main(
    device: Device,
    config: config::Device,
    send_cmd: Arc<dyn Fn(Cmd) + Send + Sync>,
) -> anyhow::Result<()> {
    if config.tablet {
        tablet_main(EvdevSession::open(device)?, config, send_cmd)
    } else {
        keys_main(device, config, send_cmd)
    }
}

fn tablet_main(
    mut session: impl TabletSession,
    config: config::Device,
    send_cmd: Arc<dyn Fn(Cmd) + Send + Sync>,
) -> anyhow::Result<()> {
    let ranges = session.ranges();
    let aspect_ratio = ranges.x.span() as f32 / ranges.y.span() as f32;
    log::debug!(
        "ranges: x={:?} y={:?} pressure={:?} ratio={} ratio_override={:?}",
        ranges.x,
        ranges.y,
        ranges.pressure,
        aspect_ratio,
        config.ratio,
    );
    let aspect_ratio = config.ratio.unwrap_or(aspect_ratio);

    let mut batch = Vec::with_capacity(MAX_PACKETS);
    loop {
        session.poll(&mut batch)?;

        // Forward the whole batch strictly in arrival order.
        for event in batch.drain(..) {
            match event {
                SessionEvent::Sample(sample) => {
                    log::trace!(
                        "packet: x={} y={} pressure={} time={:?}",
                        sample.x,
                        sample.y,
                        sample.pressure,
                        sample.time,
                    );
                    send_cmd(Cmd::PenMove {
                        position: vec2(
                            ranges.x.normalize(sample.x),
                            ranges.y.normalize(sample.y),
                        ),
                        aspect_ratio,
                        pressure: ranges.pressure.normalize(sample.pressure),
                    });
                }
                SessionEvent::Key { key, pressed } => {
                    dispatch_bind(&config, key, pressed, &send_cmd);
                }
            }
        }
    }
}

fn keys_main(
    mut device: Device,
    config: config::Device,
    send_cmd: Arc<dyn Fn(Cmd) + Send + Sync>,
) -> anyhow::Result<()> {
    loop {
        let events = device.fetch_events()?; // (blocks for new events)
        for event in events {
            if let InputEventKind::Key(key) = event.kind() {
                if event.value() == 2 {
                    // Key repeat.
                    continue;
                }
                dispatch_bind(&config, key, event.value() == 1, &send_cmd);
            }
        }
    }
}

fn dispatch_bind(
    config: &config::Device,
    key: Key,
    pressed: bool,
    send_cmd: &Arc<dyn Fn(Cmd) + Send + Sync>,
) {
    let Some(verb) = config.bind.get(&config::Key(key)) else {
        return;
    };
    match verb {
        CommandVerb::Clear => {
            if pressed {
                send_cmd(Cmd::Clear);
            }
        }
    }
}
