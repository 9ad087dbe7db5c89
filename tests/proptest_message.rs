use std::net::Ipv4Addr;

use proptest::prelude::*;

use dhcpkit::message::{BOOTREQUEST, DHCP_FIXED_HEADER_SIZE, DHCP_MAGIC_COOKIE};
use dhcpkit::options::{RelayAgentInfo, SubOptionValue};
use dhcpkit::{DhcpMessage, DhcpOption, MessageType};

fn valid_header() -> Vec<u8> {
    let mut packet = vec![0u8; DHCP_FIXED_HEADER_SIZE];
    packet[0] = 1;
    packet[1] = 1;
    packet[2] = 6;
    packet[236..240].copy_from_slice(&DHCP_MAGIC_COOKIE);
    packet
}

fn ip() -> impl Strategy<Value = Ipv4Addr> {
    any::<[u8; 4]>().prop_map(Ipv4Addr::from)
}

fn dhcp_option() -> impl Strategy<Value = DhcpOption> {
    prop_oneof![
        ip().prop_map(DhcpOption::SubnetMask),
        prop::collection::vec(ip(), 1..8).prop_map(DhcpOption::Router),
        prop::collection::vec(ip(), 1..8).prop_map(DhcpOption::DnsServer),
        "[a-z0-9-]{1,40}".prop_map(DhcpOption::Hostname),
        "[a-z0-9.]{1,60}".prop_map(DhcpOption::DomainName),
        ip().prop_map(DhcpOption::RequestedIpAddress),
        any::<u32>().prop_map(DhcpOption::LeaseTime),
        (1u8..=8).prop_map(|value| DhcpOption::message_type(value).unwrap()),
        ip().prop_map(DhcpOption::ServerIdentifier),
        (
            prop::option::of(prop::collection::vec(any::<u8>(), 0..32)),
            prop::option::of(prop::collection::vec(any::<u8>(), 0..32)),
        )
            .prop_map(|(circuit, remote)| {
                DhcpOption::RelayAgentInfo(RelayAgentInfo::new(
                    circuit.map(SubOptionValue::Binary),
                    remote.map(SubOptionValue::Binary),
                ))
            }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(2000))]

    #[test]
    fn parse_never_panics_on_arbitrary_bytes(data: Vec<u8>) {
        let _ = DhcpMessage::parse(&data);
    }

    #[test]
    fn parse_never_panics_on_valid_header_with_random_options(
        options_data in prop::collection::vec(any::<u8>(), 0..512)
    ) {
        let mut packet = valid_header();
        packet.extend_from_slice(&options_data);
        let _ = DhcpMessage::parse(&packet);
    }

    #[test]
    fn parse_never_panics_on_random_option_lengths(
        option_code in 1u8..254,
        option_length in any::<u8>(),
        option_data in prop::collection::vec(any::<u8>(), 0..256)
    ) {
        let mut packet = valid_header();
        packet.push(option_code);
        packet.push(option_length);
        let actual_len = (option_length as usize).min(option_data.len());
        packet.extend_from_slice(&option_data[..actual_len]);
        packet.push(255);
        let _ = DhcpMessage::parse(&packet);
    }

    #[test]
    fn roundtrip_encode_decode_preserves_header(
        xid in any::<u32>(),
        secs in any::<u16>(),
        flags in any::<u16>(),
        hops in any::<u8>(),
        ciaddr in any::<[u8; 4]>(),
        yiaddr in any::<[u8; 4]>(),
        siaddr in any::<[u8; 4]>(),
        giaddr in any::<[u8; 4]>(),
        hlen in 0u8..=16,
        chaddr in any::<[u8; 16]>(),
    ) {
        let mut packet = valid_header();
        packet[2] = hlen;
        packet[3] = hops;
        packet[4..8].copy_from_slice(&xid.to_be_bytes());
        packet[8..10].copy_from_slice(&secs.to_be_bytes());
        packet[10..12].copy_from_slice(&flags.to_be_bytes());
        packet[12..16].copy_from_slice(&ciaddr);
        packet[16..20].copy_from_slice(&yiaddr);
        packet[20..24].copy_from_slice(&siaddr);
        packet[24..28].copy_from_slice(&giaddr);
        packet[28..44].copy_from_slice(&chaddr);
        packet.push(255);

        let parsed = DhcpMessage::parse(&packet).unwrap();
        prop_assert_eq!(parsed.chaddr_bytes(), &chaddr[..hlen as usize]);

        let reparsed = DhcpMessage::parse(&parsed.encode()).unwrap();
        prop_assert_eq!(parsed, reparsed);
    }

    #[test]
    fn roundtrip_preserves_options(
        options in prop::collection::vec(dhcp_option(), 0..10),
        sname in "[a-z0-9.-]{0,64}",
        file in "[a-z0-9/._-]{0,128}",
    ) {
        let message = DhcpMessage::new(BOOTREQUEST)
            .with_chaddr(&[0x02, 0, 0, 0, 0, 1])
            .with_sname(sname)
            .with_file(file)
            .with_options(options);

        let encoded = message.encode();
        let option_bytes: usize = message.options().iter().map(|option| option.encode().len()).sum();
        prop_assert_eq!(encoded.len(), DHCP_FIXED_HEADER_SIZE + option_bytes + 1);
        prop_assert_eq!(encoded.last().copied(), Some(255));

        let decoded = DhcpMessage::parse(&encoded).unwrap();
        prop_assert_eq!(decoded, message);
    }

    #[test]
    fn option_codes_stay_unique(
        options in prop::collection::vec(dhcp_option(), 0..20),
    ) {
        let message = DhcpMessage::new(BOOTREQUEST).with_options(options);
        let mut codes: Vec<u8> = message.options().iter().map(|option| option.code()).collect();
        let total = codes.len();
        codes.sort_unstable();
        codes.dedup();
        prop_assert_eq!(codes.len(), total);
    }

    #[test]
    fn message_type_rejects_out_of_range(value in 9u8..=255) {
        prop_assert!(DhcpOption::message_type(value).is_err());
        prop_assert!(MessageType::try_from(value).is_err());
    }

    #[test]
    fn short_packets_always_rejected(
        data in prop::collection::vec(any::<u8>(), 0..240)
    ) {
        let result = DhcpMessage::parse(&data);
        prop_assert!(result.is_err());
    }

    #[test]
    fn bad_magic_cookie_always_rejected(
        cookie in any::<[u8; 4]>()
    ) {
        prop_assume!(cookie != DHCP_MAGIC_COOKIE);

        let mut packet = valid_header();
        packet[236..240].copy_from_slice(&cookie);
        packet.push(255);

        let result = DhcpMessage::parse(&packet);
        prop_assert!(result.is_err());
    }

    #[test]
    fn oversized_hlen_always_rejected(
        hlen in 17u8..=255
    ) {
        let mut packet = valid_header();
        packet[2] = hlen;
        packet.push(255);

        let result = DhcpMessage::parse(&packet);
        prop_assert!(result.is_err());
    }
}
