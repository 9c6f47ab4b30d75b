//! Accessory stack lifecycle
//!
//! Opening an accessory acquires a chain of libusb resources in a fixed order:
//!
//! ```text
//! context → device → config → interface → IN/OUT endpoints → read stream
//! ```
//!
//! Release runs the chain backwards. A failure part way through acquisition
//! releases whatever was already acquired before reporting. Release never
//! stops at the first failure; every step runs and every error is kept.

use crate::aoa::host::find_unique;
use crate::transport::{BulkWriter, ReadStream, StreamCloser};
use common::{DeviceIdentity, Error, Result, TeardownErrors};
use rusb::{ConfigDescriptor, Context, DeviceHandle, Direction, UsbContext};
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Bulk IN transfers kept in the read stream's buffer, in packets
pub const READ_STREAM_DEPTH: usize = 2;

/// Timeouts applied to the bulk endpoints
#[derive(Debug, Clone)]
pub struct StackSettings {
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}

impl Default for StackSettings {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_millis(500),
            write_timeout: Duration::from_secs(5),
        }
    }
}

/// Something that can be released exactly once at the end of a session
pub trait Release {
    /// Release every held resource; all failures come back as one error
    fn release(&mut self) -> Result<()>;
}

/// An opened accessory as the session sees it: one inbound byte stream,
/// one outbound sink, and a release at the end
pub trait AccessoryLink: Release + Send + 'static {
    type Stream: Read + Send + 'static;
    type Sink: Write + Send + 'static;

    /// Hand out the read stream; `None` once taken
    fn take_read_stream(&mut self) -> Option<Self::Stream>;

    /// Hand out the OUT endpoint writer; `None` once taken
    fn take_writer(&mut self) -> Option<Self::Sink>;
}

/// One endpoint of the selected interface setting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointInfo {
    pub address: u8,
    pub direction: Direction,
    pub max_packet_size: u16,
}

/// Pick the single IN and single OUT endpoint of an interface setting
pub fn select_endpoints(endpoints: &[EndpointInfo]) -> Result<(EndpointInfo, EndpointInfo)> {
    let ins: Vec<_> = endpoints
        .iter()
        .filter(|e| e.direction == Direction::In)
        .collect();
    let outs: Vec<_> = endpoints
        .iter()
        .filter(|e| e.direction == Direction::Out)
        .collect();

    match (ins.as_slice(), outs.as_slice()) {
        ([], []) => Err(Error::discovery("no endpoint found")),
        ([], _) => Err(Error::discovery("no IN-endpoint found")),
        (_, []) => Err(Error::discovery("no OUT-endpoint found")),
        ([ep_in], [ep_out]) => Ok((**ep_in, **ep_out)),
        ([_], _) => Err(Error::discovery("more than one OUT-endpoint found")),
        _ => Err(Error::discovery("more than one IN-endpoint found")),
    }
}

/// Handle operations the claim chain runs
///
/// Implemented for `rusb::DeviceHandle`; tests drive the chain with a fake.
pub trait StackDevice {
    fn kernel_driver_active(&self, interface: u8) -> rusb::Result<bool>;
    fn detach_kernel_driver(&self, interface: u8) -> rusb::Result<()>;
    fn attach_kernel_driver(&self, interface: u8) -> rusb::Result<()>;
    fn active_configuration(&self) -> rusb::Result<u8>;
    fn set_active_configuration(&self, config: u8) -> rusb::Result<()>;
    fn claim_interface(&self, interface: u8) -> rusb::Result<()>;
    fn release_interface(&self, interface: u8) -> rusb::Result<()>;
    fn set_alternate_setting(&self, interface: u8, setting: u8) -> rusb::Result<()>;
}

impl<T: UsbContext> StackDevice for DeviceHandle<T> {
    fn kernel_driver_active(&self, interface: u8) -> rusb::Result<bool> {
        DeviceHandle::kernel_driver_active(self, interface)
    }

    fn detach_kernel_driver(&self, interface: u8) -> rusb::Result<()> {
        DeviceHandle::detach_kernel_driver(self, interface)
    }

    fn attach_kernel_driver(&self, interface: u8) -> rusb::Result<()> {
        DeviceHandle::attach_kernel_driver(self, interface)
    }

    fn active_configuration(&self) -> rusb::Result<u8> {
        DeviceHandle::active_configuration(self)
    }

    fn set_active_configuration(&self, config: u8) -> rusb::Result<()> {
        DeviceHandle::set_active_configuration(self, config)
    }

    fn claim_interface(&self, interface: u8) -> rusb::Result<()> {
        DeviceHandle::claim_interface(self, interface)
    }

    fn release_interface(&self, interface: u8) -> rusb::Result<()> {
        DeviceHandle::release_interface(self, interface)
    }

    fn set_alternate_setting(&self, interface: u8, setting: u8) -> rusb::Result<()> {
        DeviceHandle::set_alternate_setting(self, interface, setting)
    }
}

/// First alternate setting of the first interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingLayout {
    pub interface: u8,
    pub alternate: u8,
    pub endpoints: Vec<EndpointInfo>,
}

/// Descriptor facts the claim chain needs, read before the device is opened
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackLayout {
    pub config: u8,
    /// Every interface of the configuration, for kernel driver detach
    pub interfaces: Vec<u8>,
    pub setting: Option<SettingLayout>,
}

impl StackLayout {
    pub fn read(descriptor: &ConfigDescriptor) -> Self {
        let setting = descriptor
            .interfaces()
            .next()
            .and_then(|interface| interface.descriptors().next())
            .map(|setting| SettingLayout {
                interface: setting.interface_number(),
                alternate: setting.setting_number(),
                endpoints: setting
                    .endpoint_descriptors()
                    .map(|e| EndpointInfo {
                        address: e.address(),
                        direction: e.direction(),
                        max_packet_size: e.max_packet_size(),
                    })
                    .collect(),
            });

        Self {
            config: descriptor.number(),
            interfaces: descriptor.interfaces().map(|i| i.number()).collect(),
            setting,
        }
    }
}

/// Active configuration we set, and the kernel drivers we detached to set it
#[derive(Debug)]
struct ConfigClaim {
    number: u8,
    detached: Vec<u8>,
}

impl ConfigClaim {
    /// Reattach every detached kernel driver; reports the first failure
    fn restore<H: StackDevice + ?Sized>(&mut self, handle: &H) -> rusb::Result<()> {
        let mut first_error = None;
        for number in self.detached.drain(..) {
            if let Err(e) = handle.attach_kernel_driver(number) {
                warn!("Failed to reattach kernel driver to interface {}: {}", number, e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[derive(Debug, Clone, Copy)]
struct InterfaceClaim {
    number: u8,
}

type ReleaseStep<'a> = (&'static str, Box<dyn FnOnce() -> rusb::Result<()> + 'a>);

/// Run release steps in the given order, collecting every failure
fn release_in_order(steps: Vec<ReleaseStep<'_>>) -> TeardownErrors {
    let mut errors = TeardownErrors::default();
    for (step, release) in steps {
        match release() {
            Ok(()) => debug!("Released {}", step),
            Err(e) => {
                warn!("Failed to release {}: {}", step, e);
                errors.push(step, e);
            }
        }
    }
    errors
}

/// Turn an acquisition failure into the error `open` reports
fn unwound(err: Error, teardown: TeardownErrors) -> Error {
    let reason = match err {
        Error::Discovery { reason, .. } => reason,
        other => other.to_string(),
    };
    Error::Discovery { reason, teardown }
}

/// Config and interface claims held on one open handle
///
/// Only claims that succeeded are recorded, so release undoes exactly what
/// acquisition did.
pub struct Claims<H: StackDevice> {
    handle: Arc<H>,
    config: Option<ConfigClaim>,
    interface: Option<InterfaceClaim>,
}

impl<H: StackDevice> Claims<H> {
    /// Claim config, interface and endpoints on `handle`, in that order
    ///
    /// A failing step releases what the earlier steps claimed, newest first,
    /// and comes back as [`Error::Discovery`] with every release error
    /// attached.
    pub fn acquire(
        handle: Arc<H>,
        layout: &StackLayout,
    ) -> Result<(Self, (EndpointInfo, EndpointInfo))> {
        let mut claims = Self {
            handle,
            config: None,
            interface: None,
        };

        match claims.claim(layout) {
            Ok(endpoints) => Ok((claims, endpoints)),
            Err(err) => {
                let teardown = claims.release();
                Err(unwound(err, teardown))
            }
        }
    }

    fn claim(&mut self, layout: &StackLayout) -> Result<(EndpointInfo, EndpointInfo)> {
        let handle = &*self.handle;

        let config = self.config.insert(ConfigClaim {
            number: layout.config,
            detached: Vec::new(),
        });
        for &number in &layout.interfaces {
            if let Ok(true) = handle.kernel_driver_active(number) {
                debug!("Detaching kernel driver from interface {}", number);
                handle.detach_kernel_driver(number)?;
                config.detached.push(number);
            }
        }
        if handle.active_configuration().ok() != Some(config.number) {
            debug!("Setting configuration {}", config.number);
            handle.set_active_configuration(config.number)?;
        }

        let setting = layout.setting.as_ref().ok_or_else(|| {
            if layout.interfaces.is_empty() {
                Error::discovery("no interface descriptor found")
            } else {
                Error::discovery("no interface alternate setting found")
            }
        })?;

        handle.claim_interface(setting.interface)?;
        self.interface = Some(InterfaceClaim {
            number: setting.interface,
        });
        if setting.alternate != 0 {
            handle.set_alternate_setting(setting.interface, setting.alternate)?;
        }

        let (ep_in, ep_out) = select_endpoints(&setting.endpoints)?;
        debug!(
            "Endpoints: IN {:#04x} ({} bytes), OUT {:#04x} ({} bytes)",
            ep_in.address, ep_in.max_packet_size, ep_out.address, ep_out.max_packet_size
        );
        Ok((ep_in, ep_out))
    }

    pub fn handle(&self) -> &Arc<H> {
        &self.handle
    }

    /// Release the interface, then the config; later calls find nothing left
    pub fn release(&mut self) -> TeardownErrors {
        let handle = &*self.handle;
        let mut steps: Vec<ReleaseStep<'_>> = Vec::new();

        if let Some(claim) = self.interface.take() {
            steps.push(("interface", Box::new(move || handle.release_interface(claim.number))));
        }
        if let Some(mut claim) = self.config.take() {
            steps.push(("config", Box::new(move || claim.restore(handle))));
        }

        release_in_order(steps)
    }
}

impl<H: StackDevice> Drop for Claims<H> {
    fn drop(&mut self) {
        let errors = self.release();
        if !errors.is_empty() {
            warn!("Errors releasing claims on drop: {}", errors);
        }
    }
}

/// The full resource chain of one opened accessory
///
/// Every field is optional so a half-built stack can be released with the
/// same code as a complete one, and so a second release is a no-op.
pub struct AccessoryStack {
    identity: DeviceIdentity,
    settings: StackSettings,
    context: Option<Context>,
    claims: Option<Claims<DeviceHandle<Context>>>,
    out_endpoint: Option<EndpointInfo>,
    read_stream: Option<ReadStream>,
    stream_closer: Option<StreamCloser>,
}

impl AccessoryStack {
    fn empty(identity: DeviceIdentity, settings: StackSettings) -> Self {
        Self {
            identity,
            settings,
            context: None,
            claims: None,
            out_endpoint: None,
            read_stream: None,
            stream_closer: None,
        }
    }

    /// Open the accessory stack of the one visible device matching `identity`
    ///
    /// On failure everything acquired so far is released and the original
    /// failure comes back as [`Error::Discovery`], carrying any teardown
    /// errors alongside.
    pub fn open(identity: &DeviceIdentity, settings: &StackSettings) -> Result<Self> {
        let mut stack = Self::empty(*identity, settings.clone());

        match stack.acquire() {
            Ok(()) => {
                info!("Accessory stack opened: {}", identity);
                Ok(stack)
            }
            Err(err) => {
                warn!("Cannot open stack: {}, {}", identity, err);
                let teardown = stack.release_all();
                // Claims unwind themselves; their errors are already attached
                Err(match err {
                    err @ Error::Discovery { .. } if teardown.is_empty() => err,
                    other => unwound(other, teardown),
                })
            }
        }
    }

    fn acquire(&mut self) -> Result<()> {
        let context: &Context = self.context.insert(Context::new()?);
        let device = find_unique(context, &self.identity)?;
        let descriptor = device.device_descriptor()?;

        let config_descriptor = (0..descriptor.num_configurations())
            .filter_map(|i| device.config_descriptor(i).ok())
            .min_by_key(|c| c.number())
            .ok_or_else(|| Error::discovery("no config descriptor found"))?;
        let layout = StackLayout::read(&config_descriptor);

        let handle = Arc::new(device.open()?);
        let (claims, (ep_in, ep_out)) = Claims::acquire(Arc::clone(&handle), &layout)?;
        self.claims = Some(claims);
        self.out_endpoint = Some(ep_out);

        let (stream, closer) = ReadStream::open(
            handle,
            ep_in.address,
            usize::from(ep_in.max_packet_size) * READ_STREAM_DEPTH,
            self.settings.read_timeout,
        );
        self.read_stream = Some(stream);
        self.stream_closer = Some(closer);

        Ok(())
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Tear down in reverse acquisition order
    ///
    /// Safe to call more than once; later calls find nothing left to release.
    pub fn close(&mut self) -> Result<()> {
        self.release_all().into_result()
    }

    fn release_all(&mut self) -> TeardownErrors {
        if let Some(closer) = self.stream_closer.take() {
            closer.close();
            debug!("Released read stream");
        }
        self.read_stream = None;
        self.out_endpoint = None;

        let errors = match self.claims.take() {
            Some(mut claims) => {
                let errors = claims.release();
                if Arc::strong_count(claims.handle()) > 1 {
                    debug!("Device handle still held by a worker, closing when it exits");
                }
                errors
            }
            None => TeardownErrors::default(),
        };

        if self.context.take().is_some() {
            debug!("Released context for {}", self.identity);
        }

        errors
    }
}

impl Release for AccessoryStack {
    fn release(&mut self) -> Result<()> {
        self.close()
    }
}

impl AccessoryLink for AccessoryStack {
    type Stream = ReadStream;
    type Sink = BulkWriter;

    fn take_read_stream(&mut self) -> Option<ReadStream> {
        self.read_stream.take()
    }

    fn take_writer(&mut self) -> Option<BulkWriter> {
        let handle = self.claims.as_ref()?.handle();
        let endpoint = self.out_endpoint.take()?;
        Some(BulkWriter::new(
            Arc::clone(handle),
            endpoint.address,
            self.settings.write_timeout,
        ))
    }
}

impl Drop for AccessoryStack {
    fn drop(&mut self) {
        let errors = self.release_all();
        if !errors.is_empty() {
            warn!("Errors releasing accessory stack on drop: {}", errors);
        }
    }
}
