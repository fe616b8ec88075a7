//! Synchronous rtnetlink link table.
//!
//! One socket per namespace. Requests are sent one at a time and the reply
//! is drained before the next request goes out.

use crate::error::{FabricError, FabricResult};
use crate::kernel::{
    Link, LinkKind, LinkOps, NetNs, NewLink, VxlanAttrs, VXLAN_AGEING_SECS, VXLAN_TX_QUEUE_LEN,
};
use k8slan_types::MacvtapMode;
use netlink_packet_core::{
    NetlinkHeader, NetlinkMessage, NetlinkPayload, NLM_F_ACK, NLM_F_CREATE, NLM_F_DUMP,
    NLM_F_EXCL, NLM_F_REQUEST,
};
use netlink_packet_route::link::{
    InfoBridgePort, InfoData, InfoKind, InfoMacVtap, InfoPortData, InfoPortKind, InfoVeth,
    InfoVlan, InfoVxlan, LinkAttribute, LinkFlags, LinkInfo, LinkMessage, MacVtapMode,
};
use netlink_packet_route::route::{RouteAttribute, RouteMessage, RouteType};
use netlink_packet_route::RouteNetlinkMessage;
use netlink_sys::{protocols::NETLINK_ROUTE, Socket, SocketAddr};
use std::io;
use std::net::IpAddr;
use std::os::fd::AsRawFd;
use tracing::trace;

/// The kernel's main routing table.
const RT_TABLE_MAIN: u32 = 254;

/// How a request expects the kernel to answer.
#[derive(Debug, Clone, Copy)]
enum Request {
    /// A single object in reply.
    Get,
    /// A multipart dump terminated by NLMSG_DONE.
    Dump,
    /// Create a new object, failing if it exists.
    Create,
    /// Modify or delete an existing object.
    Change,
}

impl Request {
    fn flags(self) -> u16 {
        match self {
            Request::Get => NLM_F_REQUEST,
            Request::Dump => NLM_F_REQUEST | NLM_F_DUMP,
            Request::Create => NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE | NLM_F_EXCL,
            Request::Change => NLM_F_REQUEST | NLM_F_ACK,
        }
    }
}

/// A NETLINK_ROUTE socket bound in the namespace it was opened in.
pub struct RtNetlink {
    socket: Socket,
    sequence: u32,
}

impl RtNetlink {
    /// Opens a socket in the calling thread's namespace.
    pub fn open() -> FabricResult<Self> {
        let mut socket = Socket::new(NETLINK_ROUTE)
            .map_err(|e| FabricError::netlink("open socket", e))?;
        socket
            .bind_auto()
            .map_err(|e| FabricError::netlink("bind socket", e))?;
        socket
            .connect(&SocketAddr::new(0, 0))
            .map_err(|e| FabricError::netlink("connect socket", e))?;
        Ok(Self {
            socket,
            sequence: 0,
        })
    }

    fn request(
        &mut self,
        operation: &str,
        message: RouteNetlinkMessage,
        kind: Request,
    ) -> FabricResult<Vec<RouteNetlinkMessage>> {
        self.sequence = self.sequence.wrapping_add(1);
        let mut header = NetlinkHeader::default();
        header.flags = kind.flags();
        header.sequence_number = self.sequence;

        let mut packet = NetlinkMessage::new(header, NetlinkPayload::InnerMessage(message));
        packet.finalize();
        let mut buf = vec![0u8; packet.buffer_len()];
        packet.serialize(&mut buf);

        trace!(operation, sequence = self.sequence, "Sending netlink request");
        self.socket
            .send(&buf, 0)
            .map_err(|e| FabricError::netlink(operation, e))?;

        let mut replies = Vec::new();
        loop {
            let (data, _) = self
                .socket
                .recv_from_full()
                .map_err(|e| FabricError::netlink(operation, e))?;
            if collect_replies(&data, self.sequence, kind, operation, &mut replies)? {
                return Ok(replies);
            }
        }
    }

    fn get_link(&mut self, operation: &str, message: LinkMessage) -> FabricResult<Option<Link>> {
        match self.request(operation, RouteNetlinkMessage::GetLink(message), Request::Get) {
            Ok(replies) => Ok(replies.into_iter().find_map(|reply| match reply {
                RouteNetlinkMessage::NewLink(link) => Some(link_from_message(link)),
                _ => None,
            })),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn change_link(&mut self, operation: &str, message: LinkMessage) -> FabricResult<()> {
        self.request(operation, RouteNetlinkMessage::SetLink(message), Request::Change)
            .map(drop)
    }
}

/// Netlink messages start on 4-byte boundaries.
fn nlmsg_align(length: usize) -> usize {
    (length + 3) & !3
}

/// Walks one datagram, collecting the replies to `sequence`.
///
/// Returns true once the request is complete: an ack, the end of a dump,
/// or the single answer to a get.
fn collect_replies(
    data: &[u8],
    sequence: u32,
    kind: Request,
    operation: &str,
    replies: &mut Vec<RouteNetlinkMessage>,
) -> FabricResult<bool> {
    let mut offset = 0;
    while offset < data.len() {
        let reply = NetlinkMessage::<RouteNetlinkMessage>::deserialize(&data[offset..])
            .map_err(|e| {
                FabricError::netlink(
                    operation,
                    io::Error::new(io::ErrorKind::InvalidData, e.to_string()),
                )
            })?;
        let length = reply.header.length as usize;
        if length == 0 {
            break;
        }
        offset += nlmsg_align(length);

        if reply.header.sequence_number != sequence {
            continue;
        }
        match reply.payload {
            NetlinkPayload::Done(_) => return Ok(true),
            NetlinkPayload::Error(err) => {
                return match err.code {
                    Some(code) => Err(FabricError::errno(operation, -code.get())),
                    None => Ok(true),
                };
            }
            NetlinkPayload::InnerMessage(inner) => {
                replies.push(inner);
                if matches!(kind, Request::Get) {
                    return Ok(true);
                }
            }
            _ => {}
        }
    }
    Ok(false)
}

/// Routing table id of a route; ids above 255 only travel as an attribute.
fn route_table(route: &RouteMessage) -> u32 {
    route
        .attributes
        .iter()
        .find_map(|attr| match attr {
            RouteAttribute::Table(table) => Some(*table),
            _ => None,
        })
        .unwrap_or(u32::from(route.header.table))
}

/// Egress link of the main table's unicast default route.
fn default_route_oif(routes: &[RouteMessage]) -> Option<u32> {
    routes
        .iter()
        .filter(|route| {
            route.header.destination_prefix_length == 0
                && route.header.kind == RouteType::Unicast
                && route_table(route) == RT_TABLE_MAIN
        })
        .find_map(|route| {
            route.attributes.iter().find_map(|attr| match attr {
                RouteAttribute::Oif(index) => Some(*index),
                _ => None,
            })
        })
}

fn link_from_message(message: LinkMessage) -> Link {
    let mut link = Link::new(message.header.index, String::new(), LinkKind::Device);
    link.up = message.header.flags.contains(LinkFlags::Up);

    for attr in message.attributes {
        match attr {
            LinkAttribute::IfName(name) => link.name = name,
            LinkAttribute::Mtu(mtu) => link.mtu = mtu,
            LinkAttribute::TxQueueLen(len) => link.tx_queue_len = len,
            LinkAttribute::Link(parent) => link.parent = Some(parent),
            LinkAttribute::Controller(master) => link.master = Some(master),
            LinkAttribute::LinkInfo(infos) => {
                for info in infos {
                    match info {
                        LinkInfo::Kind(kind) => link.kind = kind_from_info(&kind),
                        LinkInfo::Data(InfoData::Vxlan(attrs)) => {
                            link.vxlan = Some(vxlan_from_info(&attrs));
                        }
                        LinkInfo::Data(InfoData::Vlan(attrs)) => {
                            link.vlan_id = attrs.iter().find_map(|a| match a {
                                InfoVlan::Id(id) => Some(*id),
                                _ => None,
                            });
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }
    link
}

fn kind_from_info(kind: &InfoKind) -> LinkKind {
    match kind {
        InfoKind::Bridge => LinkKind::Bridge,
        InfoKind::Vxlan => LinkKind::Vxlan,
        InfoKind::Veth => LinkKind::Veth,
        InfoKind::Vlan => LinkKind::Vlan,
        InfoKind::MacVtap => LinkKind::Macvtap,
        InfoKind::Other(other) => LinkKind::from_kind(other),
        other => LinkKind::Other(format!("{other:?}").to_lowercase()),
    }
}

fn vxlan_from_info(attrs: &[InfoVxlan]) -> VxlanAttrs {
    let mut vxlan = VxlanAttrs::default();
    for attr in attrs {
        match attr {
            InfoVxlan::Id(vni) => vxlan.vni = *vni,
            InfoVxlan::Group(group) => vxlan.group = Some(IpAddr::V4(*group)),
            InfoVxlan::Group6(group) => vxlan.group = Some(IpAddr::V6(*group)),
            InfoVxlan::Link(uplink) => vxlan.uplink = Some(*uplink),
            InfoVxlan::Port(port) => vxlan.port = *port,
            _ => {}
        }
    }
    vxlan
}

fn macvtap_mode(mode: MacvtapMode) -> MacVtapMode {
    match mode {
        MacvtapMode::Bridge => MacVtapMode::Bridge,
        MacvtapMode::Private => MacVtapMode::Private,
        MacvtapMode::Vepa => MacVtapMode::Vepa,
        MacvtapMode::Passthru => MacVtapMode::Passthrough,
    }
}

fn link_info(kind: InfoKind, data: Option<InfoData>) -> LinkAttribute {
    let mut infos = vec![LinkInfo::Kind(kind)];
    infos.extend(data.map(LinkInfo::Data));
    LinkAttribute::LinkInfo(infos)
}

fn new_link_message(link: &NewLink) -> LinkMessage {
    let mut message = LinkMessage::default();
    message
        .attributes
        .push(LinkAttribute::IfName(link.name().to_string()));

    match link {
        NewLink::Bridge { mtu, .. } => {
            message.attributes.push(LinkAttribute::Mtu(*mtu));
            message.attributes.push(link_info(InfoKind::Bridge, None));
        }
        NewLink::Vxlan {
            mtu,
            vni,
            group,
            uplink,
            port,
            namespace,
            ..
        } => {
            let group = match group {
                IpAddr::V4(addr) => InfoVxlan::Group(*addr),
                IpAddr::V6(addr) => InfoVxlan::Group6(*addr),
            };
            let data = InfoData::Vxlan(vec![
                InfoVxlan::Id(*vni),
                group,
                InfoVxlan::Link(*uplink),
                InfoVxlan::Port(*port),
                InfoVxlan::Learning(true),
                InfoVxlan::Ageing(VXLAN_AGEING_SECS),
                InfoVxlan::Proxy(false),
            ]);
            message.attributes.push(LinkAttribute::Mtu(*mtu));
            message
                .attributes
                .push(LinkAttribute::TxQueueLen(VXLAN_TX_QUEUE_LEN));
            message
                .attributes
                .push(link_info(InfoKind::Vxlan, Some(data)));
            if let Some(fd) = namespace.as_ref().and_then(NetNs::file) {
                message
                    .attributes
                    .push(LinkAttribute::NetNsFd(fd.as_raw_fd()));
            }
        }
        NewLink::Veth { peer, mtu, .. } => {
            let mut peer_message = LinkMessage::default();
            peer_message
                .attributes
                .push(LinkAttribute::IfName(peer.clone()));
            peer_message.attributes.push(LinkAttribute::Mtu(*mtu));

            message.attributes.push(LinkAttribute::Mtu(*mtu));
            message.attributes.push(link_info(
                InfoKind::Veth,
                Some(InfoData::Veth(InfoVeth::Peer(peer_message))),
            ));
        }
        NewLink::Vlan {
            parent,
            vlan_id,
            mtu,
            ..
        } => {
            message.attributes.push(LinkAttribute::Link(*parent));
            message.attributes.push(LinkAttribute::Mtu(*mtu));
            message.attributes.push(link_info(
                InfoKind::Vlan,
                Some(InfoData::Vlan(vec![InfoVlan::Id(*vlan_id)])),
            ));
        }
        NewLink::Macvtap {
            lower,
            mode,
            tx_queue_len,
            ..
        } => {
            message.attributes.push(LinkAttribute::Link(*lower));
            message
                .attributes
                .push(LinkAttribute::TxQueueLen(*tx_queue_len));
            message.attributes.push(link_info(
                InfoKind::MacVtap,
                Some(InfoData::MacVtap(vec![InfoMacVtap::Mode(macvtap_mode(
                    *mode,
                ))])),
            ));
        }
    }
    message
}

impl LinkOps for RtNetlink {
    fn link_by_name(&mut self, name: &str) -> FabricResult<Option<Link>> {
        let mut message = LinkMessage::default();
        message
            .attributes
            .push(LinkAttribute::IfName(name.to_string()));
        self.get_link(&format!("get link {name}"), message)
    }

    fn link_by_index(&mut self, index: u32) -> FabricResult<Option<Link>> {
        let mut message = LinkMessage::default();
        message.header.index = index;
        self.get_link(&format!("get link #{index}"), message)
    }

    fn add_link(&mut self, link: &NewLink) -> FabricResult<()> {
        let operation = format!("add {} link {}", link.kind(), link.name());
        self.request(
            &operation,
            RouteNetlinkMessage::NewLink(new_link_message(link)),
            Request::Create,
        )
        .map(drop)
    }

    fn delete_link(&mut self, index: u32) -> FabricResult<()> {
        let mut message = LinkMessage::default();
        message.header.index = index;
        self.request(
            &format!("delete link #{index}"),
            RouteNetlinkMessage::DelLink(message),
            Request::Change,
        )
        .map(drop)
    }

    fn set_up(&mut self, index: u32) -> FabricResult<()> {
        let mut message = LinkMessage::default();
        message.header.index = index;
        message.header.flags = LinkFlags::Up;
        message.header.change_mask = LinkFlags::Up;
        self.change_link(&format!("set link #{index} up"), message)
    }

    fn set_master(&mut self, index: u32, master: u32) -> FabricResult<()> {
        let mut message = LinkMessage::default();
        message.header.index = index;
        message.attributes.push(LinkAttribute::Controller(master));
        self.change_link(&format!("set link #{index} master #{master}"), message)
    }

    fn set_group_fwd_mask(&mut self, index: u32, mask: u16) -> FabricResult<()> {
        let mut message = LinkMessage::default();
        message.header.index = index;
        message.attributes.push(LinkAttribute::LinkInfo(vec![
            LinkInfo::PortKind(InfoPortKind::Bridge),
            LinkInfo::PortData(InfoPortData::BridgePort(vec![
                InfoBridgePort::GroupFwdMask(mask),
            ])),
        ]));
        // Bridge port options are only accepted through RTM_NEWLINK.
        self.request(
            &format!("set link #{index} group_fwd_mask {mask}"),
            RouteNetlinkMessage::NewLink(message),
            Request::Change,
        )
        .map(drop)
    }

    fn move_to_namespace(&mut self, index: u32, ns: &NetNs) -> FabricResult<()> {
        let file = ns
            .file()
            .ok_or_else(|| FabricError::namespace(ns.name(), "namespace handle is not open"))?;
        let mut message = LinkMessage::default();
        message.header.index = index;
        message
            .attributes
            .push(LinkAttribute::NetNsFd(file.as_raw_fd()));
        self.change_link(
            &format!("move link #{index} to netns {}", ns.name()),
            message,
        )
    }

    fn default_route_link(&mut self) -> FabricResult<Option<u32>> {
        let replies = self.request(
            "dump routes",
            RouteNetlinkMessage::GetRoute(RouteMessage::default()),
            Request::Dump,
        )?;

        let routes: Vec<RouteMessage> = replies
            .into_iter()
            .filter_map(|reply| match reply {
                RouteNetlinkMessage::NewRoute(route) => Some(route),
                _ => None,
            })
            .collect();
        Ok(default_route_oif(&routes))
    }
}
