//! libpcap backend.
//!
//! Opens one capture per interface matching the configured address and
//! pushes a BPF program into the kernel where the platform supports it;
//! elsewhere the same predicate runs in user space. Frames are stripped
//! down to `[src IP][TCP segment]` records before they enter the queue.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use pcap::{Active, Capture, Device};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use super::{MIN_SEGMENT_LEN, SNAPLEN, build_record};
use crate::error::{CaptureError, Result};
use crate::listener::ListenerConfig;

const DLT_NULL: i32 = 0;
const DLT_ETHERNET: i32 = 1;
const DLT_RAW: i32 = 12;
const DLT_LOOP: i32 = 108;

/// BPF programs cannot be installed on pcap handles on macOS.
const BPF_SUPPORTED: bool = !cfg!(target_os = "macos");

/// Enumerate matching devices and spawn one capture thread per device.
/// No matching device is a configuration error; a device that fails to
/// open is skipped with a warning, as links come and go.
pub(crate) fn start(
    config: &ListenerConfig,
    expire: Duration,
    records: mpsc::Sender<Vec<u8>>,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    for device in find_devices(&config.addr)? {
        let capture = match open_device(&device, config, expire) {
            Ok(capture) => capture,
            Err(e) => {
                warn!(device = %device.name, error = %e, "skipping device");
                continue;
            }
        };
        let records = records.clone();
        let shutdown = shutdown.clone();
        let filter = DeviceFilter::new(&device, config);
        std::thread::Builder::new()
            .name(format!("httptap-pcap-{}", device.name))
            .spawn(move || run_device(capture, filter, records, shutdown))?;
    }
    Ok(())
}

/// Devices matching the capture address. The empty address and the
/// IPv4/IPv6 wildcards select every interface that has an address.
fn find_devices(addr: &str) -> Result<Vec<Device>> {
    let devices = Device::list()?;
    let matched: Vec<Device> = if is_wildcard(addr) {
        devices
            .into_iter()
            .filter(|d| !d.addresses.is_empty())
            .collect()
    } else {
        devices
            .into_iter()
            .filter(|d| d.name == addr || d.addresses.iter().any(|a| a.addr.to_string() == addr))
            .take(1)
            .collect()
    };

    if matched.is_empty() {
        return Err(device_not_found(addr));
    }
    Ok(matched)
}

fn is_wildcard(addr: &str) -> bool {
    matches!(addr, "" | "0.0.0.0" | "[::]" | "::")
}

fn device_not_found(addr: &str) -> CaptureError {
    let mut available = String::new();
    for device in Device::list().unwrap_or_default() {
        available.push_str("name: ");
        available.push_str(&device.name);
        available.push('\n');
        if let Some(desc) = &device.desc {
            available.push_str("description: ");
            available.push_str(desc);
            available.push('\n');
        }
        for address in &device.addresses {
            available.push_str(&format!("- IP address: {}\n", address.addr));
        }
    }
    if available.is_empty() {
        available.push_str(
            "no network interfaces visible; capture needs CAP_NET_RAW or root\n",
        );
    }
    CaptureError::DeviceNotFound {
        addr: addr.to_string(),
        available,
    }
}

struct OpenCapture {
    capture: Capture<Active>,
    /// Link-layer bytes to strip from every frame
    link_offset: usize,
    /// Whether the kernel is already filtering for us
    bpf_applied: bool,
}

fn open_device(
    device: &Device,
    config: &ListenerConfig,
    expire: Duration,
) -> Result<OpenCapture> {
    let mut capture = Capture::from_device(device.clone())?
        .snaplen(SNAPLEN as i32)
        .promisc(true)
        .timeout(expire.as_millis() as i32)
        .open()?;

    let linktype = capture.get_datalink();
    let link_offset = match linktype.0 {
        DLT_ETHERNET => 14,
        DLT_NULL | DLT_LOOP => 4,
        // Tunnel interfaces hand us the IP packet directly.
        DLT_RAW => 0,
        other => {
            return Err(CaptureError::UnsupportedLinkType {
                device: device.name.clone(),
                linktype: other,
            });
        }
    };

    let bpf_applied = if BPF_SUPPORTED {
        let addresses: Vec<IpAddr> = device.addresses.iter().map(|a| a.addr).collect();
        let program = bpf_expression(config.port, config.track_response, &addresses);
        capture
            .filter(&program, true)
            .map_err(|source| CaptureError::BpfFilter {
                device: device.name.clone(),
                source,
            })?;
        true
    } else {
        false
    };

    Ok(OpenCapture {
        capture,
        link_offset,
        bpf_applied,
    })
}

/// `tcp dst port P` toward any of the device's addresses, plus the
/// mirrored `src` clause when responses are tracked.
fn bpf_expression(port: u16, track_response: bool, addresses: &[IpAddr]) -> String {
    let dst_hosts = addresses
        .iter()
        .map(|addr| format!("dst host {addr}"))
        .collect::<Vec<_>>()
        .join(" or ");
    if !track_response {
        return format!("tcp dst port {port} and ({dst_hosts})");
    }
    let src_hosts = addresses
        .iter()
        .map(|addr| format!("src host {addr}"))
        .collect::<Vec<_>>()
        .join(" or ");
    format!(
        "(tcp dst port {port} and ({dst_hosts})) or (tcp src port {port} and ({src_hosts}))"
    )
}

/// The per-device predicate applied in user space when no BPF program
/// could be installed.
struct DeviceFilter {
    port: u16,
    track_response: bool,
    addresses: Vec<IpAddr>,
}

impl DeviceFilter {
    fn new(device: &Device, config: &ListenerConfig) -> Self {
        Self {
            port: config.port,
            track_response: config.track_response,
            addresses: device.addresses.iter().map(|a| a.addr).collect(),
        }
    }
}

fn run_device(
    open: OpenCapture,
    filter: DeviceFilter,
    records: mpsc::Sender<Vec<u8>>,
    shutdown: watch::Receiver<bool>,
) {
    let OpenCapture {
        mut capture,
        link_offset,
        bpf_applied,
    } = open;

    loop {
        if *shutdown.borrow() {
            break;
        }
        let frame = match capture.next_packet() {
            Ok(frame) => frame,
            // Read timeout: just a chance to observe shutdown.
            Err(pcap::Error::TimeoutExpired) => continue,
            Err(pcap::Error::NoMorePackets) => break,
            Err(e) => {
                warn!(error = %e, "pcap read failed");
                continue;
            }
        };
        let Some(record) = decode_frame(frame.data, link_offset, bpf_applied, &filter) else {
            continue;
        };
        if records.try_send(record).is_err() {
            debug!("inbound queue full; dropping pcap frame");
        }
    }
    debug!("pcap capture stopped");
}

/// Strip link and IP layers off a captured frame and build the inbound
/// record. `None` for truncated frames and, when filtering in user
/// space, for traffic that is not ours.
fn decode_frame(
    frame: &[u8],
    link_offset: usize,
    bpf_applied: bool,
    filter: &DeviceFilter,
) -> Option<Vec<u8>> {
    let packet = frame.get(link_offset..)?;
    let (src, dst, segment) = strip_ip(packet)?;

    if segment.len() < MIN_SEGMENT_LEN {
        return None;
    }
    let header_len = ((segment[12] & 0xF0) >> 4) as usize * 4;
    if segment.len() <= header_len {
        return None;
    }

    if !bpf_applied {
        let src_port = u16::from_be_bytes([segment[0], segment[1]]);
        let dst_port = u16::from_be_bytes([segment[2], segment[3]]);
        let check = if dst_port == filter.port {
            dst
        } else if filter.track_response && src_port == filter.port {
            src
        } else {
            return None;
        };
        if !filter.addresses.contains(&check) {
            return None;
        }
    }

    Some(build_record(src, segment))
}

/// Parse the IP layer, returning source, destination and the TCP bytes.
fn strip_ip(packet: &[u8]) -> Option<(IpAddr, IpAddr, &[u8])> {
    match packet.first()? >> 4 {
        4 => {
            let header_len = (packet[0] & 0x0F) as usize * 4;
            if header_len < 20 || packet.len() < header_len {
                return None;
            }
            let src = Ipv4Addr::new(packet[12], packet[13], packet[14], packet[15]);
            let dst = Ipv4Addr::new(packet[16], packet[17], packet[18], packet[19]);
            Some((IpAddr::V4(src), IpAddr::V4(dst), &packet[header_len..]))
        }
        6 => {
            if packet.len() < 40 {
                return None;
            }
            let mut src = [0u8; 16];
            let mut dst = [0u8; 16];
            src.copy_from_slice(&packet[8..24]);
            dst.copy_from_slice(&packet[24..40]);
            Some((
                IpAddr::V6(Ipv6Addr::from(src)),
                IpAddr::V6(Ipv6Addr::from(dst)),
                &packet[40..],
            ))
        }
        _ => None,
    }
}
