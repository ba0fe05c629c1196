//! Service round trip: request from a client, response from a server.

use emuavcan::core::{
    DataTypeSignature, NodeId, Priority, ServiceKind, ServiceTypeId, TransferId,
};
use emuavcan::frame::{DataSpecifier, Header};
use emuavcan::time::Instant;
use emuavcan::transfer::Transfer;
use emuavcan::{Instance, TransferHandler, TransmitError};

const SIGNATURE: DataTypeSignature = DataTypeSignature::new(0xee46_8a8121c46a9e);
const SERVICE: ServiceTypeId = ServiceTypeId::new(82);

/// Records requests so the test can answer them after `handle_frame` returns.
#[derive(Default)]
struct Server {
    requests: Vec<(Header, TransferId, Vec<u8>)>,
}

impl TransferHandler for Server {
    fn should_accept(&mut self, header: &Header) -> Option<DataTypeSignature> {
        matches!(header.data_spec, DataSpecifier::Request(service) if service == SERVICE)
            .then_some(SIGNATURE)
    }

    fn on_transfer(&mut self, transfer: &mut Transfer<'_>) {
        let mut payload = vec![0; transfer.payload_len()];
        transfer.copy_payload(&mut payload);
        self.requests
            .push((transfer.header, transfer.transfer_id, payload));
    }
}

#[derive(Default)]
struct Client {
    responses: Vec<(Header, TransferId, Vec<u8>)>,
}

impl TransferHandler for Client {
    fn should_accept(&mut self, header: &Header) -> Option<DataTypeSignature> {
        matches!(header.data_spec, DataSpecifier::Response(_)).then_some(SIGNATURE)
    }

    fn on_transfer(&mut self, transfer: &mut Transfer<'_>) {
        let mut payload = vec![0; transfer.payload_len()];
        transfer.copy_payload(&mut payload);
        self.responses
            .push((transfer.header, transfer.transfer_id, payload));
    }
}

fn node(id: u8) -> NodeId {
    NodeId::new(id).unwrap()
}

fn ts(us: u64) -> Instant {
    Instant::from_micros(us)
}

#[test]
fn test_request_response_round_trip() {
    let mut client: Instance<Client, 32, 4> = Instance::new(Client::default());
    client.set_local_node_id(node(10)).unwrap();
    let mut server: Instance<Server, 32, 4> = Instance::new(Server::default());
    server.set_local_node_id(node(20)).unwrap();

    // Client -> server: a multi-frame parameter request.
    let request_payload: Vec<u8> = (0..30u8).collect();
    let mut request_id = TransferId::default();
    client
        .request_or_respond(
            node(20),
            SIGNATURE,
            SERVICE,
            &mut request_id,
            Priority::MEDIUM,
            ServiceKind::Request,
            &request_payload,
        )
        .unwrap();
    assert_eq!(u8::from(request_id), 1);

    while let Some(frame) = client.pop_tx_frame() {
        server.handle_frame(&frame, ts(100));
    }

    assert_eq!(server.handler().requests.len(), 1);
    let (request_header, received_id, received_payload) = server.handler().requests[0].clone();
    assert_eq!(received_payload, request_payload);
    assert_eq!(request_header.source, Some(node(10)));
    assert_eq!(request_header.destination, Some(node(20)));

    // Server -> client: the response reuses the request's transfer id.
    let mut response_id = received_id;
    server
        .request_or_respond(
            request_header.source.unwrap(),
            SIGNATURE,
            SERVICE,
            &mut response_id,
            Priority::MEDIUM,
            ServiceKind::Response,
            &[0xab, 0xcd],
        )
        .unwrap();
    assert_eq!(response_id, received_id);

    while let Some(frame) = server.pop_tx_frame() {
        client.handle_frame(&frame, ts(200));
    }

    assert_eq!(client.handler().responses.len(), 1);
    let (response_header, response_tid, response_payload) = client.handler().responses[0].clone();
    assert_eq!(response_payload, [0xab, 0xcd]);
    assert_eq!(response_tid, received_id);
    assert_eq!(
        response_header.data_spec,
        DataSpecifier::Response(SERVICE)
    );
}

#[test]
fn test_service_requires_node_id() {
    let mut anonymous: Instance<Client, 8, 2> = Instance::new(Client::default());
    let mut transfer_id = TransferId::default();

    assert_eq!(
        anonymous.request_or_respond(
            node(20),
            SIGNATURE,
            SERVICE,
            &mut transfer_id,
            Priority::MEDIUM,
            ServiceKind::Request,
            &[1],
        ),
        Err(TransmitError::NodeIdNotSet)
    );
}

#[test]
fn test_request_for_another_node_is_ignored() {
    let mut client: Instance<Client, 32, 4> = Instance::new(Client::default());
    client.set_local_node_id(node(10)).unwrap();
    let mut bystander: Instance<Server, 32, 4> = Instance::new(Server::default());
    bystander.set_local_node_id(node(21)).unwrap();

    let mut request_id = TransferId::default();
    client
        .request_or_respond(
            node(20),
            SIGNATURE,
            SERVICE,
            &mut request_id,
            Priority::MEDIUM,
            ServiceKind::Request,
            &(0..30u8).collect::<Vec<u8>>(),
        )
        .unwrap();

    while let Some(frame) = client.pop_tx_frame() {
        bystander.handle_frame(&frame, ts(100));
    }
    assert!(bystander.handler().requests.is_empty());
    assert_eq!(bystander.pool_statistics().peak_usage_blocks, 0);
}
