/// Name reported for ports missing from the table.
pub const UNKNOWN_SERVICE: &str = "Unknown";

// Sorted by port; looked up with a binary search.
const SERVICES: &[(u16, &str)] = &[
    (7, "Echo"),
    (20, "FTP-Data"),
    (21, "FTP"),
    (22, "SSH"),
    (23, "Telnet"),
    (25, "SMTP"),
    (53, "DNS"),
    (67, "DHCP"),
    (68, "DHCP"),
    (69, "TFTP"),
    (80, "HTTP"),
    (110, "POP3"),
    (111, "RPC"),
    (119, "NNTP"),
    (123, "NTP"),
    (135, "MSRPC"),
    (137, "NetBIOS-NS"),
    (138, "NetBIOS-DGM"),
    (139, "NetBIOS-SSN"),
    (143, "IMAP"),
    (161, "SNMP"),
    (162, "SNMP-Trap"),
    (179, "BGP"),
    (194, "IRC"),
    (389, "LDAP"),
    (443, "HTTPS"),
    (445, "SMB"),
    (464, "Kerberos"),
    (465, "SMTPS"),
    (514, "Syslog"),
    (515, "LPD"),
    (520, "RIP"),
    (521, "RIPng"),
    (543, "Klogin"),
    (544, "Kshell"),
    (548, "AFP"),
    (554, "RTSP"),
    (563, "NNTPS"),
    (587, "Submission"),
    (593, "HTTP-RPC"),
    (631, "IPP"),
    (636, "LDAPS"),
    (646, "LDP"),
    (873, "Rsync"),
    (902, "VMware"),
    (989, "FTPS-Data"),
    (990, "FTPS"),
    (993, "IMAPS"),
    (995, "POP3S"),
    (1080, "SOCKS"),
    (1194, "OpenVPN"),
    (1433, "MSSQL"),
    (1434, "MSSQL-Monitor"),
    (1521, "Oracle"),
    (1723, "PPTP"),
    (1883, "MQTT"),
    (2049, "NFS"),
    (2082, "cPanel"),
    (2083, "cPanel-SSL"),
    (2181, "ZooKeeper"),
    (2222, "SSH-Alt"),
    (2375, "Docker"),
    (2376, "Docker-SSL"),
    (3000, "Node.js"),
    (3306, "MySQL"),
    (3389, "RDP"),
    (3690, "SVN"),
    (4000, "ICQ"),
    (4443, "HTTPS-Alt"),
    (4444, "Metasploit"),
    (5000, "Flask"),
    (5432, "PostgreSQL"),
    (5672, "RabbitMQ"),
    (5900, "VNC"),
    (5984, "CouchDB"),
    (6379, "Redis"),
    (6443, "Kubernetes"),
    (6666, "IRC-Alt"),
    (6667, "IRC"),
    (7001, "WebLogic"),
    (8000, "HTTP-Alt"),
    (8008, "HTTP-Alt"),
    (8080, "HTTP-Proxy"),
    (8081, "HTTP-Alt"),
    (8443, "HTTPS-Alt"),
    (8888, "HTTP-Alt"),
    (9000, "PHP-FPM"),
    (9090, "WebSM"),
    (9200, "Elasticsearch"),
    (9300, "Elasticsearch"),
    (9418, "Git"),
    (9999, "Urchin"),
    (10000, "Webmin"),
    (11211, "Memcached"),
    (27017, "MongoDB"),
    (27018, "MongoDB"),
    (28017, "MongoDB-Web"),
    (50000, "SAP"),
];

/// Well-known service name for a TCP port, or [`UNKNOWN_SERVICE`].
pub fn service_name(port: u16) -> &'static str {
    SERVICES
        .binary_search_by_key(&port, |&(p, _)| p)
        .map(|idx| SERVICES[idx].1)
        .unwrap_or(UNKNOWN_SERVICE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_sorted_for_binary_search() {
        assert!(SERVICES.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[test]
    fn known_and_unknown_ports() {
        assert_eq!(service_name(22), "SSH");
        assert_eq!(service_name(80), "HTTP");
        assert_eq!(service_name(27017), "MongoDB");
        assert_eq!(service_name(1), UNKNOWN_SERVICE);
        assert_eq!(service_name(65535), UNKNOWN_SERVICE);
    }
}
