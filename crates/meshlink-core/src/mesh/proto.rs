//! Meshtastic protobuf messages
//!
//! Hand-written `prost` derives for the subset of the Meshtastic schema a
//! node needs to exchange: the `Data` envelope, `Position`, `User` and the
//! `PortNum` enumeration. Field tags and scalar encodings match the
//! published `.proto` files, so encode/decode is bit-for-bit compatible
//! with devices on the air.

/// Application port a `Data` envelope is addressed to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum PortNum {
    UnknownApp = 0,
    TextMessageApp = 1,
    RemoteHardwareApp = 2,
    PositionApp = 3,
    NodeinfoApp = 4,
    RoutingApp = 5,
    AdminApp = 6,
    TextMessageCompressedApp = 7,
    WaypointApp = 8,
    AudioApp = 9,
    DetectionSensorApp = 10,
    ReplyApp = 32,
    IpTunnelApp = 33,
    PaxcounterApp = 34,
    SerialApp = 64,
    StoreForwardApp = 65,
    RangeTestApp = 66,
    TelemetryApp = 67,
    ZpsApp = 68,
    SimulatorApp = 69,
    TracerouteApp = 70,
    NeighborinfoApp = 71,
    AtakPlugin = 72,
    MapReportApp = 73,
    PrivateApp = 256,
    AtakForwarder = 257,
    Max = 511,
}

impl PortNum {
    /// Short label used in logs and CLI output
    pub fn label(&self) -> &'static str {
        match self {
            PortNum::UnknownApp => "unknown",
            PortNum::TextMessageApp => "text",
            PortNum::RemoteHardwareApp => "remote-hardware",
            PortNum::PositionApp => "position",
            PortNum::NodeinfoApp => "nodeinfo",
            PortNum::RoutingApp => "routing",
            PortNum::AdminApp => "admin",
            PortNum::TextMessageCompressedApp => "text-compressed",
            PortNum::WaypointApp => "waypoint",
            PortNum::AudioApp => "audio",
            PortNum::DetectionSensorApp => "detection-sensor",
            PortNum::ReplyApp => "reply",
            PortNum::IpTunnelApp => "ip-tunnel",
            PortNum::PaxcounterApp => "paxcounter",
            PortNum::SerialApp => "serial",
            PortNum::StoreForwardApp => "store-forward",
            PortNum::RangeTestApp => "range-test",
            PortNum::TelemetryApp => "telemetry",
            PortNum::ZpsApp => "zps",
            PortNum::SimulatorApp => "simulator",
            PortNum::TracerouteApp => "traceroute",
            PortNum::NeighborinfoApp => "neighborinfo",
            PortNum::AtakPlugin => "atak-plugin",
            PortNum::MapReportApp => "map-report",
            PortNum::PrivateApp => "private",
            PortNum::AtakForwarder => "atak-forwarder",
            PortNum::Max => "max",
        }
    }
}

/// Decrypted payload of every frame
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Data {
    #[prost(enumeration = "PortNum", tag = "1")]
    pub portnum: i32,
    #[prost(bytes = "vec", tag = "2")]
    pub payload: Vec<u8>,
    #[prost(bool, tag = "3")]
    pub want_response: bool,
    #[prost(fixed32, tag = "4")]
    pub dest: u32,
    #[prost(fixed32, tag = "5")]
    pub source: u32,
    #[prost(fixed32, tag = "6")]
    pub request_id: u32,
    #[prost(fixed32, tag = "7")]
    pub reply_id: u32,
    #[prost(fixed32, tag = "8")]
    pub emoji: u32,
    /// Explicit presence: `Some(0)` still goes on the wire
    #[prost(uint32, optional, tag = "9")]
    pub bitfield: Option<u32>,
}

/// POSITION_APP payload
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Position {
    /// Degrees * 1e7
    #[prost(sfixed32, optional, tag = "1")]
    pub latitude_i: Option<i32>,
    /// Degrees * 1e7
    #[prost(sfixed32, optional, tag = "2")]
    pub longitude_i: Option<i32>,
    /// Meters above MSL
    #[prost(int32, optional, tag = "3")]
    pub altitude: Option<i32>,
    /// Seconds since the unix epoch
    #[prost(fixed32, tag = "4")]
    pub time: u32,
}

/// NODEINFO_APP payload
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct User {
    /// Node id in `!xxxxxxxx` form
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub long_name: String,
    #[prost(string, tag = "3")]
    pub short_name: String,
    #[prost(bytes = "vec", tag = "4")]
    pub macaddr: Vec<u8>,
    /// HardwareModel enumeration, kept numeric
    #[prost(int32, tag = "5")]
    pub hw_model: i32,
    #[prost(bool, tag = "6")]
    pub is_licensed: bool,
    /// Config.DeviceConfig.Role enumeration, kept numeric
    #[prost(int32, tag = "7")]
    pub role: i32,
    #[prost(bytes = "vec", tag = "8")]
    pub public_key: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn test_data_wire_bytes() {
        let data = Data {
            portnum: PortNum::TextMessageApp as i32,
            payload: b"TEST".to_vec(),
            bitfield: Some(0),
            ..Default::default()
        };
        assert_eq!(data.encode_to_vec(), [0x08, 0x01, 0x12, 0x04, b'T', b'E', b'S', b'T', 0x48, 0x00]);

        let no_bitfield = Data { bitfield: None, ..data };
        assert_eq!(no_bitfield.encode_to_vec().len(), 8);
    }

    #[test]
    fn test_portnum_numeric_values() {
        assert_eq!(PortNum::TelemetryApp as i32, 67);
        assert_eq!(PortNum::TracerouteApp as i32, 70);
        assert_eq!(PortNum::NeighborinfoApp as i32, 71);
        assert_eq!(PortNum::try_from(4), Ok(PortNum::NodeinfoApp));
        assert!(PortNum::try_from(12345).is_err());
    }

    #[test]
    fn test_position_sfixed_encoding() {
        let pos = Position {
            latitude_i: Some(-1),
            longitude_i: None,
            altitude: None,
            time: 0,
        };
        // tag 1, wire type 5 (32-bit), then little-endian -1
        assert_eq!(pos.encode_to_vec(), [0x0d, 0xff, 0xff, 0xff, 0xff]);
        assert_eq!(Position::decode(&[0x0d, 0xff, 0xff, 0xff, 0xff][..]).unwrap(), pos);
    }

    #[test]
    fn test_user_decode() {
        let user = User {
            id: "!bba88770".into(),
            long_name: "Base Camp".into(),
            short_name: "BC".into(),
            hw_model: 9,
            ..Default::default()
        };
        let decoded = User::decode(user.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded.long_name, "Base Camp");
        assert_eq!(decoded.hw_model, 9);
        assert!(decoded.macaddr.is_empty());
    }
}
