#[cfg(test)]
mod tests {
    use stable_ipam::error::PluginError;
    use stable_ipam::network::constants;
    use stable_ipam::network::netlink::Socket;
    use stable_ipam::network::netlink_route::{self, LinkID, NetlinkRoute};
    use stable_ipam::network::route::{HostNetwork, NetlinkHost};
    use std::net::Ipv4Addr;

    macro_rules! test_setup {
        () => {
            if !nix::unistd::getuid().is_root() {
                // there is no actual way to mark a test as skipped
                // https://internals.rust-lang.org/t/pre-rfc-skippable-tests/14611
                eprintln!("test skipped, requires root");
                return;
            }
            nix::sched::unshare(nix::sched::CloneFlags::CLONE_NEWNET)
                .expect("unshare(CLONE_NEWNET)");
        };
    }

    macro_rules! run_command {
        ($command:expr  $(, $args:expr)*) => {
            std::process::Command::new($command).args([$($args),*]).output()
                .expect("failed to run command")
        };
    }

    macro_rules! run_ok {
        ($command:expr  $(, $args:expr)*) => {
            let out = run_command!($command $(, $args)*);
            eprintln!("{}", String::from_utf8_lossy(&out.stderr));
            assert!(out.status.success(), "command failed");
        };
    }

    /// dummy parent with a macvlan child carrying the node address
    fn setup_macvlan(with_addr: bool) {
        run_ok!("ip", "link", "add", "parent0", "type", "dummy");
        run_ok!("ip", "link", "set", "parent0", "up");
        run_ok!(
            "ip", "link", "add", "mv0", "link", "parent0", "type", "macvlan", "mode", "bridge"
        );
        run_ok!("ip", "link", "set", "mv0", "up");
        if with_addr {
            run_ok!("ip", "addr", "add", "192.168.100.2/24", "dev", "mv0");
            run_ok!("ip", "addr", "add", "192.168.100.3/24", "dev", "mv0");
        }
    }

    fn ip_route_show(dest: &str) -> String {
        String::from_utf8(run_command!("ip", "route", "show", dest).stdout)
            .expect("convert to string failed")
    }

    #[test]
    fn test_socket_new() {
        test_setup!();
        assert!(
            Socket::<NetlinkRoute>::new().is_ok(),
            "Netlink Socket::new() should work"
        );
    }

    #[test]
    fn test_get_link_kind() {
        test_setup!();
        setup_macvlan(false);
        let mut sock = Socket::<NetlinkRoute>::new().expect("Socket::new()");

        let link = sock
            .get_link(LinkID::Name("mv0".into()))
            .expect("get_link failed");
        assert_eq!(netlink_route::link_kind(&link), "macvlan");

        let link = sock
            .get_link(LinkID::ID(link.header.index))
            .expect("get_link by id failed");
        assert_eq!(netlink_route::link_kind(&link), "macvlan");

        let link = sock
            .get_link(LinkID::Name("parent0".into()))
            .expect("get_link failed");
        assert_eq!(netlink_route::link_kind(&link), "dummy");

        let link = sock
            .get_link(LinkID::Name("lo".into()))
            .expect("get_link failed");
        assert_eq!(netlink_route::link_kind(&link), "");
    }

    #[test]
    fn test_master_link_not_found() {
        test_setup!();
        let mut host = NetlinkHost::new().expect("NetlinkHost::new()");

        let err = host.master_link("missing0").expect_err("link does not exist");
        assert!(matches!(err, PluginError::LinkNotFound(_)), "{err:?}");
        assert_eq!(err.code(), constants::ERR_LINK_NOT_FOUND);
    }

    #[test]
    fn test_dump_addresses() {
        test_setup!();
        setup_macvlan(true);
        let mut sock = Socket::<NetlinkRoute>::new().expect("Socket::new()");
        let link = sock
            .get_link(LinkID::Name("mv0".into()))
            .expect("get_link failed");

        let addresses = sock
            .dump_addresses(Some(link.header.index))
            .expect("dump_addresses failed");
        assert_eq!(
            netlink_route::ipv4_addresses(&addresses),
            vec![
                "192.168.100.2".parse::<Ipv4Addr>().unwrap(),
                "192.168.100.3".parse::<Ipv4Addr>().unwrap()
            ]
        );
    }

    #[test]
    fn test_route_lifecycle() {
        test_setup!();
        setup_macvlan(true);
        let mut host = NetlinkHost::new().expect("NetlinkHost::new()");
        let master = host.master_link("mv0").expect("master_link failed");
        assert!(master.is_macvlan());

        let ip: Ipv4Addr = "10.0.0.5".parse().unwrap();
        host.create_route(&master, ip).expect("create_route failed");
        let out = ip_route_show("10.0.0.5");
        assert!(
            out.contains("10.0.0.5 via 192.168.100.2 dev mv0"),
            "route does not exist: {out}"
        );
        assert!(host.has_route(&master, ip).expect("has_route failed"));

        // replace semantics, a second create is fine and does not duplicate
        host.create_route(&master, ip).expect("create_route failed");
        assert_eq!(ip_route_show("10.0.0.5").lines().count(), 1);

        host.delete_route(&master, ip).expect("delete_route failed");
        assert_eq!(ip_route_show("10.0.0.5"), "");
        assert!(!host.has_route(&master, ip).expect("has_route failed"));

        // a missing route is not an error
        host.delete_route(&master, ip).expect("delete_route failed");
    }

    #[test]
    fn test_create_route_without_master_address() {
        test_setup!();
        setup_macvlan(false);
        let mut host = NetlinkHost::new().expect("NetlinkHost::new()");
        let master = host.master_link("mv0").expect("master_link failed");

        let err = host
            .create_route(&master, "10.0.0.5".parse().unwrap())
            .expect_err("no gateway address");
        assert!(err.to_string().contains("no IPv4 address"), "{err}");

        // deleting still works, the kernel matches on dest and device
        host.delete_route(&master, "10.0.0.5".parse().unwrap())
            .expect("delete_route failed");
    }
}
