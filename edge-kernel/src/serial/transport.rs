//! Ouverture du flux octets vers la carte.
//!
//! Le superviseur ne voit qu'un flux bidirectionnel ; le port série réel et
//! le simulateur de la devkit implémentent le même `LinkOpener`.

use serde::Serialize;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_serial::SerialPortBuilderExt;

/// Flux bidirectionnel consommé par le lien
pub trait DeviceStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> DeviceStream for T {}

pub type BoxedStream = Box<dyn DeviceStream>;

/// Fabrique de flux : appelée une fois par `connect`
pub trait LinkOpener: Send + Sync {
    fn open(&self, port: &str, baud_rate: u32) -> io::Result<BoxedStream>;
}

/// Port série réel (8N1, sans contrôle de flux)
#[derive(Debug, Default, Clone)]
pub struct SerialOpener;

impl LinkOpener for SerialOpener {
    fn open(&self, port: &str, baud_rate: u32) -> io::Result<BoxedStream> {
        let stream = tokio_serial::new(port, baud_rate)
            .open_native_async()
            .map_err(io::Error::from)?;
        Ok(Box::new(stream))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PortInfo {
    pub path: String,
    pub kind: String,
}

/// Ports série visibles par l'OS
pub fn available_ports() -> io::Result<Vec<PortInfo>> {
    let ports = tokio_serial::available_ports().map_err(io::Error::from)?;
    Ok(ports
        .into_iter()
        .map(|p| PortInfo {
            kind: match p.port_type {
                tokio_serial::SerialPortType::UsbPort(usb) => usb
                    .product
                    .unwrap_or_else(|| format!("usb {:04x}:{:04x}", usb.vid, usb.pid)),
                tokio_serial::SerialPortType::PciPort => "pci".into(),
                tokio_serial::SerialPortType::BluetoothPort => "bluetooth".into(),
                tokio_serial::SerialPortType::Unknown => "unknown".into(),
            },
            path: p.port_name,
        })
        .collect())
}
