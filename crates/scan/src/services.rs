//! Well-known service name lookup
//!
//! A static port-to-name table consulted for every produced result. This is
//! deliberately not a fingerprinting database; it only labels the ports an
//! operator will recognize on sight.

use netwarden_common::Protocol;

/// Look up the conventional service name for a port.
pub fn service_name(port: u16, protocol: Protocol) -> Option<&'static str> {
    match protocol {
        Protocol::Tcp => tcp_service(port),
        Protocol::Udp => udp_service(port),
    }
}

fn tcp_service(port: u16) -> Option<&'static str> {
    Some(match port {
        20 => "ftp-data",
        21 => "ftp",
        22 => "ssh",
        23 => "telnet",
        25 => "smtp",
        53 => "domain",
        80 => "http",
        110 => "pop3",
        111 => "rpcbind",
        135 => "msrpc",
        139 => "netbios-ssn",
        143 => "imap",
        443 => "https",
        445 => "microsoft-ds",
        465 => "smtps",
        587 => "submission",
        993 => "imaps",
        995 => "pop3s",
        1433 => "ms-sql-s",
        1723 => "pptp",
        3306 => "mysql",
        3389 => "ms-wbt-server",
        5432 => "postgresql",
        5900 => "vnc",
        6379 => "redis",
        8080 => "http-proxy",
        8443 => "https-alt",
        9200 => "elasticsearch",
        27017 => "mongodb",
        _ => return None,
    })
}

fn udp_service(port: u16) -> Option<&'static str> {
    Some(match port {
        53 => "domain",
        67 => "dhcps",
        68 => "dhcpc",
        69 => "tftp",
        123 => "ntp",
        137 => "netbios-ns",
        161 => "snmp",
        162 => "snmptrap",
        500 => "isakmp",
        514 => "syslog",
        1900 => "ssdp",
        5353 => "mdns",
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_ports() {
        assert_eq!(service_name(22, Protocol::Tcp), Some("ssh"));
        assert_eq!(service_name(53, Protocol::Udp), Some("domain"));
        assert_eq!(service_name(161, Protocol::Udp), Some("snmp"));
    }

    #[test]
    fn unknown_ports() {
        assert_eq!(service_name(40_000, Protocol::Tcp), None);
        assert_eq!(service_name(22, Protocol::Udp), None);
    }
}
