use hickory_proto::op::{Edns, Message};

/// UDP payload size advertised through EDNS0.
const MAX_UDP_PAYLOAD: u16 = 4096;

/// Marks a query as recursion desired and DNSSEC aware (EDNS0 with the DO
/// bit), so upstream resolvers include RRSIG records in their answers.
pub fn with_dnssec(message: &mut Message) {
    message.set_recursion_desired(true);
    let edns = message.extensions_mut().get_or_insert_with(Edns::new);
    edns.set_max_payload(MAX_UDP_PAYLOAD);
    edns.set_version(0);
    edns.set_dnssec_ok(true);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sets_do_bit_and_payload_size() {
        let mut message = Message::new();
        with_dnssec(&mut message);

        assert!(message.recursion_desired());
        let edns = message.extensions().as_ref().unwrap();
        assert!(edns.flags().dnssec_ok);
        assert_eq!(edns.max_payload(), 4096);
    }
}
