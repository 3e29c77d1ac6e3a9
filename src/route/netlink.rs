//! Kernel routing table access over `NETLINK_ROUTE`.
//!
//! Requests are assembled by hand and sent over a raw netlink socket that is
//! opened for the duration of a single request. Only the main table is
//! consulted. Both address families are supported; the family of each
//! request follows the destination or subnet being looked at.

use super::{RouteEntry, RouteError, RouteTable};
use crate::ip::{Family, Subnet};
use ipnet::IpNet;
use log::debug;
use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

// ---------------------------------------------------------------------------
// Netlink constants (from linux/netlink.h, linux/rtnetlink.h)
// ---------------------------------------------------------------------------

const NETLINK_ROUTE: i32 = 0;

const RTM_NEWROUTE: u16 = 24;
const RTM_DELROUTE: u16 = 25;
const RTM_GETROUTE: u16 = 26;

const NLM_F_REQUEST: u16 = 0x0001;
const NLM_F_ACK: u16 = 0x0004;
const NLM_F_ROOT: u16 = 0x0100;
const NLM_F_MATCH: u16 = 0x0200;
const NLM_F_DUMP: u16 = NLM_F_ROOT | NLM_F_MATCH;
const NLM_F_EXCL: u16 = 0x0200;
const NLM_F_CREATE: u16 = 0x0400;

const NLMSG_NOOP: u16 = 1;
const NLMSG_ERROR: u16 = 2;
const NLMSG_DONE: u16 = 3;

const AF_INET: u8 = 2;
const AF_INET6: u8 = 10;

const RTA_DST: u16 = 1;
const RTA_OIF: u16 = 4;
const RTA_GATEWAY: u16 = 5;
const RTA_MULTIPATH: u16 = 9;
const RTA_TABLE: u16 = 15;

const RT_TABLE_MAIN: u8 = 254;

const RT_SCOPE_LINK: u8 = 253;
const RT_SCOPE_NOWHERE: u8 = 255;

const RTN_UNICAST: u8 = 1;

const NLMSG_HDR_LEN: usize = 16;
const NLMSG_ALIGN: usize = 4;
const RTMSG_LEN: usize = 12;
// rtnexthop: len(2) + flags(1) + hops(1) + ifindex(4)
const RTNH_LEN: usize = 8;

const RECV_TIMEOUT_SECS: libc::time_t = 5;

// ---------------------------------------------------------------------------
// Socket
// ---------------------------------------------------------------------------

struct NetlinkSocket {
    fd: i32,
    seq: u32,
    pid: u32,
}

impl NetlinkSocket {
    fn open() -> io::Result<Self> {
        let fd = unsafe {
            libc::socket(
                libc::AF_NETLINK,
                libc::SOCK_RAW | libc::SOCK_CLOEXEC,
                NETLINK_ROUTE,
            )
        };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        // Let the kernel assign the port id.
        let mut addr: libc::sockaddr_nl = unsafe { std::mem::zeroed() };
        addr.nl_family = libc::AF_NETLINK as u16;

        let ret = unsafe {
            libc::bind(
                fd,
                &addr as *const libc::sockaddr_nl as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(err);
        }

        let mut bound: libc::sockaddr_nl = unsafe { std::mem::zeroed() };
        let mut addrlen = std::mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t;
        let ret = unsafe {
            libc::getsockname(
                fd,
                &mut bound as *mut libc::sockaddr_nl as *mut libc::sockaddr,
                &mut addrlen,
            )
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(err);
        }

        // A lost reply must not hang the allocation forever.
        if let Err(err) = set_receive_timeout(fd, RECV_TIMEOUT_SECS) {
            unsafe { libc::close(fd) };
            return Err(err);
        }

        Ok(NetlinkSocket {
            fd,
            seq: 1,
            pid: bound.nl_pid,
        })
    }

    /// Send a request and collect the payload messages until DONE or an ACK/error.
    fn request(&mut self, msg: &[u8]) -> io::Result<Vec<Vec<u8>>> {
        let sent =
            unsafe { libc::send(self.fd, msg.as_ptr() as *const libc::c_void, msg.len(), 0) };
        if sent < 0 {
            return Err(io::Error::last_os_error());
        }

        let mut responses = Vec::new();
        let mut buf = vec![0u8; 65536];

        loop {
            let n =
                unsafe { libc::recv(self.fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), 0) };
            if n < 0 {
                return Err(io::Error::last_os_error());
            }
            let n = n as usize;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "netlink socket closed before the reply completed",
                ));
            }

            let mut offset = 0;
            while offset + NLMSG_HDR_LEN <= n {
                let nlmsg_len = read_u32(&buf, offset) as usize;
                let nlmsg_type = read_u16(&buf, offset + 4);

                if nlmsg_len < NLMSG_HDR_LEN || offset + nlmsg_len > n {
                    break;
                }

                match nlmsg_type {
                    NLMSG_DONE => return Ok(responses),
                    NLMSG_ERROR => {
                        // nlmsghdr followed by a negative errno, zero for an ACK
                        if nlmsg_len >= NLMSG_HDR_LEN + 4 {
                            let errno = read_i32(&buf, offset + NLMSG_HDR_LEN);
                            if errno < 0 {
                                return Err(io::Error::from_raw_os_error(-errno));
                            }
                        }
                        return Ok(responses);
                    }
                    NLMSG_NOOP => {}
                    _ => responses.push(buf[offset..offset + nlmsg_len].to_vec()),
                }

                offset += nlmsg_align(nlmsg_len);
            }
        }
    }

    fn next_seq(&mut self) -> u32 {
        let s = self.seq;
        self.seq = self.seq.wrapping_add(1);
        s
    }
}

fn set_receive_timeout(fd: i32, seconds: libc::time_t) -> io::Result<()> {
    let tv = libc::timeval {
        tv_sec: seconds,
        tv_usec: 0,
    };
    let ret = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_RCVTIMEO,
            &tv as *const libc::timeval as *const libc::c_void,
            std::mem::size_of::<libc::timeval>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

impl Drop for NetlinkSocket {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// The fixed `rtmsg` header of a route request
#[derive(Debug, Clone, Copy, Default)]
struct RouteHeader {
    family: u8,
    dst_len: u8,
    table: u8,
    protocol: u8,
    scope: u8,
    kind: u8,
}

/// A netlink route message under construction
struct RouteRequest {
    buf: Vec<u8>,
}

impl RouteRequest {
    fn new(msg_type: u16, flags: u16, seq: u32, pid: u32, header: RouteHeader) -> Self {
        let mut buf = vec![0u8; NLMSG_HDR_LEN + RTMSG_LEN];
        put_u16(&mut buf, 4, msg_type);
        put_u16(&mut buf, 6, flags);
        put_u32(&mut buf, 8, seq);
        put_u32(&mut buf, 12, pid);

        let rt = NLMSG_HDR_LEN;
        buf[rt] = header.family;
        buf[rt + 1] = header.dst_len;
        buf[rt + 4] = header.table;
        buf[rt + 5] = header.protocol;
        buf[rt + 6] = header.scope;
        buf[rt + 7] = header.kind;

        RouteRequest { buf }
    }

    fn attr(mut self, rta_type: u16, payload: &[u8]) -> Self {
        let start = self.buf.len();
        let rta_len = 4 + payload.len();
        self.buf.resize(start + rta_align(rta_len), 0);
        put_u16(&mut self.buf, start, rta_len as u16);
        put_u16(&mut self.buf, start + 2, rta_type);
        self.buf[start + 4..start + rta_len].copy_from_slice(payload);
        self
    }

    fn finish(mut self) -> Vec<u8> {
        let len = self.buf.len() as u32;
        put_u32(&mut self.buf, 0, len);
        self.buf
    }
}

/// A route as dumped by the kernel
#[derive(Debug, Clone, PartialEq, Eq)]
struct KernelRoute {
    destination: IpNet,
    gateway: Option<IpAddr>,
    oif: Option<u32>,
    protocol: u8,
    table: u32,
    path_count: usize,
}

fn parse_route(msg: &[u8]) -> Option<KernelRoute> {
    if msg.len() < NLMSG_HDR_LEN + RTMSG_LEN || read_u16(msg, 4) != RTM_NEWROUTE {
        return None;
    }

    let payload = &msg[NLMSG_HDR_LEN..];
    let family = payload[0];
    let dst_len = payload[1];
    let table = payload[4];
    let protocol = payload[5];

    let attrs = parse_rtattrs(&payload[RTMSG_LEN..]);

    let dst = match attrs.get(&RTA_DST) {
        Some(data) => parse_addr(family, data)?,
        None => unspecified(family)?,
    };
    let destination = IpNet::new(dst, dst_len).ok()?;

    let gateway = attrs.get(&RTA_GATEWAY).and_then(|d| parse_addr(family, d));
    let oif = attrs
        .get(&RTA_OIF)
        .filter(|d| d.len() >= 4)
        .map(|d| read_u32(d, 0));
    let table = attrs
        .get(&RTA_TABLE)
        .filter(|d| d.len() >= 4)
        .map(|d| read_u32(d, 0))
        .unwrap_or(table as u32);
    let path_count = attrs
        .get(&RTA_MULTIPATH)
        .map(|d| count_nexthops(d))
        .filter(|n| *n > 0)
        .unwrap_or(1);

    Some(KernelRoute {
        destination,
        gateway,
        oif,
        protocol,
        table,
        path_count,
    })
}

/// Number of `rtnexthop` records in an `RTA_MULTIPATH` payload
fn count_nexthops(data: &[u8]) -> usize {
    let mut count = 0;
    let mut offset = 0;

    while offset + RTNH_LEN <= data.len() {
        let rtnh_len = read_u16(data, offset) as usize;
        if rtnh_len < RTNH_LEN || offset + rtnh_len > data.len() {
            break;
        }
        count += 1;
        offset += rta_align(rtnh_len);
    }

    count
}

fn parse_addr(family: u8, data: &[u8]) -> Option<IpAddr> {
    match family {
        AF_INET if data.len() >= 4 => Some(IpAddr::V4(Ipv4Addr::new(
            data[0], data[1], data[2], data[3],
        ))),
        AF_INET6 if data.len() >= 16 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&data[..16]);
            Some(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        _ => None,
    }
}

fn unspecified(family: u8) -> Option<IpAddr> {
    match family {
        AF_INET => Some(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
        AF_INET6 => Some(IpAddr::V6(Ipv6Addr::UNSPECIFIED)),
        _ => None,
    }
}

fn family_code(family: Family) -> u8 {
    match family {
        Family::V4 => AF_INET,
        Family::V6 => AF_INET6,
    }
}

fn addr_bytes(addr: IpAddr) -> Vec<u8> {
    match addr {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    }
}

fn host_route_request(
    msg_type: u16,
    flags: u16,
    seq: u32,
    pid: u32,
    destination: IpNet,
    link_index: u32,
    protocol: u8,
    scope: u8,
) -> Vec<u8> {
    let header = RouteHeader {
        family: family_code(Family::of(destination.addr())),
        dst_len: destination.prefix_len(),
        table: RT_TABLE_MAIN,
        protocol,
        scope,
        kind: RTN_UNICAST,
    };

    RouteRequest::new(msg_type, flags, seq, pid, header)
        .attr(RTA_DST, &addr_bytes(destination.addr()))
        .attr(RTA_OIF, &link_index.to_ne_bytes())
        .finish()
}

// ---------------------------------------------------------------------------
// Route table
// ---------------------------------------------------------------------------

/// The kernel's main routing table
#[derive(Debug, Default, Clone, Copy)]
pub struct NetlinkRouteTable;

impl NetlinkRouteTable {
    pub fn new() -> Self {
        NetlinkRouteTable
    }

    /// Dump every main-table route of one family
    fn list_routes(&self, family: Family) -> io::Result<Vec<KernelRoute>> {
        let mut nl = NetlinkSocket::open()?;
        let seq = nl.next_seq();

        let header = RouteHeader {
            family: family_code(family),
            table: RT_TABLE_MAIN,
            ..RouteHeader::default()
        };
        let msg = RouteRequest::new(RTM_GETROUTE, NLM_F_REQUEST | NLM_F_DUMP, seq, nl.pid, header).finish();

        let routes = nl
            .request(&msg)?
            .iter()
            .filter_map(|resp| parse_route(resp))
            .filter(|route| route.table == RT_TABLE_MAIN as u32)
            .collect();

        Ok(routes)
    }
}

impl RouteTable for NetlinkRouteTable {
    fn query_routes(&mut self, destination: IpNet) -> Result<Vec<RouteEntry>, RouteError> {
        let routes = self.list_routes(Family::of(destination.addr()))?;

        Ok(routes
            .into_iter()
            .filter(|route| route.destination == destination)
            .map(|route| RouteEntry {
                destination,
                link_index: route.oif,
                protocol: route.protocol,
                path_count: route.path_count,
            })
            .collect())
    }

    fn add_route(&mut self, destination: IpNet, link_index: u32, protocol: u8) -> Result<(), RouteError> {
        let mut nl = NetlinkSocket::open()?;
        let seq = nl.next_seq();
        let msg = host_route_request(
            RTM_NEWROUTE,
            NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE | NLM_F_EXCL,
            seq,
            nl.pid,
            destination,
            link_index,
            protocol,
            RT_SCOPE_LINK,
        );

        debug!("RTM_NEWROUTE {} dev {} proto {}", destination, link_index, protocol);
        nl.request(&msg).map(|_| ()).map_err(|err| match err.raw_os_error() {
            Some(libc::EEXIST) => RouteError::RouteExists { destination },
            _ => RouteError::Netlink(err),
        })
    }

    fn delete_route(&mut self, destination: IpNet, link_index: u32, protocol: u8) -> Result<(), RouteError> {
        let mut nl = NetlinkSocket::open()?;
        let seq = nl.next_seq();
        let msg = host_route_request(
            RTM_DELROUTE,
            NLM_F_REQUEST | NLM_F_ACK,
            seq,
            nl.pid,
            destination,
            link_index,
            protocol,
            RT_SCOPE_NOWHERE,
        );

        debug!("RTM_DELROUTE {} dev {} proto {}", destination, link_index, protocol);
        nl.request(&msg).map(|_| ()).map_err(|err| match err.raw_os_error() {
            Some(libc::ESRCH) => RouteError::NoSuchRoute {
                destination,
                link_index,
                protocol,
            },
            _ => RouteError::Netlink(err),
        })
    }

    fn resolve_local_interface(&mut self, subnet: &Subnet) -> Result<Option<u32>, RouteError> {
        let routes = self.list_routes(subnet.family())?;

        let connected = routes
            .iter()
            .filter(|route| route.gateway.is_none() && route.path_count == 1)
            .filter(|route| route.destination.contains(&subnet.net()))
            .filter_map(|route| route.oif.map(|oif| (route.destination.prefix_len(), oif)))
            .max_by_key(|(prefix_len, _)| *prefix_len)
            .map(|(_, oif)| oif);

        debug!("Directly connected interface for {}: {:?}", subnet, connected);
        Ok(connected)
    }
}

// ---------------------------------------------------------------------------
// Attribute parsing and serialization helpers
// ---------------------------------------------------------------------------

/// Parse a sequence of rtattr TLVs into a map keyed by attribute type.
fn parse_rtattrs(data: &[u8]) -> HashMap<u16, Vec<u8>> {
    let mut attrs = HashMap::new();
    let mut offset = 0;

    while offset + 4 <= data.len() {
        let rta_len = read_u16(data, offset) as usize;
        let rta_type = read_u16(data, offset + 2);

        if rta_len < 4 || offset + rta_len > data.len() {
            break;
        }

        // Strip NLA_F_NESTED / NLA_F_NET_BYTEORDER.
        attrs.insert(rta_type & 0x3FFF, data[offset + 4..offset + rta_len].to_vec());

        offset += rta_align(rta_len);
    }

    attrs
}

fn nlmsg_align(len: usize) -> usize {
    (len + NLMSG_ALIGN - 1) & !(NLMSG_ALIGN - 1)
}

fn rta_align(len: usize) -> usize {
    (len + 3) & !3
}

fn put_u16(buf: &mut [u8], offset: usize, val: u16) {
    buf[offset..offset + 2].copy_from_slice(&val.to_ne_bytes());
}

fn put_u32(buf: &mut [u8], offset: usize, val: u32) {
    buf[offset..offset + 4].copy_from_slice(&val.to_ne_bytes());
}

fn read_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_ne_bytes([buf[offset], buf[offset + 1]])
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_ne_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

fn read_i32(buf: &[u8], offset: usize) -> i32 {
    i32::from_ne_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}
