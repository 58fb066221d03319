use chrono::Utc;
use rust_decimal_macros::dec;
use stakerunner::domain::{
    ContractId, ContractStatus, ContractUpdate, Proposal, Purchase, SubscriptionTarget,
};
use stakerunner::port::{Envelope, Inbound, InboundBody, Outbound};
use stakerunner::testkit::transport::{reply, stream_message};

/// Contract id the scripted venue assigns to every purchase.
pub const CONTRACT: &str = "90210";

pub fn open_update() -> ContractUpdate {
    ContractUpdate {
        contract_id: ContractId::from(CONTRACT),
        is_sold: false,
        status: Some(ContractStatus::Open),
        profit: dec!(0.10),
        payout: dec!(1.95),
        exit_epoch: None,
    }
}

pub fn closing_update() -> ContractUpdate {
    ContractUpdate {
        contract_id: ContractId::from(CONTRACT),
        is_sold: true,
        status: Some(ContractStatus::Won),
        profit: dec!(0.95),
        payout: dec!(1.95),
        exit_epoch: Some(Utc::now().timestamp()),
    }
}

/// A venue that quotes, sells one contract and streams it as open.
pub fn trading_venue(envelope: &Envelope) -> Vec<Inbound> {
    match &envelope.body {
        Outbound::Proposal { request, .. } => vec![reply(
            envelope.req_id,
            InboundBody::Proposal(Proposal {
                id: "prop-1".into(),
                ask_price: request.stake,
                payout: dec!(1.95),
            }),
        )],
        Outbound::Buy { price, .. } => vec![reply(
            envelope.req_id,
            InboundBody::Bought(Purchase {
                contract_id: ContractId::from(CONTRACT),
                buy_price: *price,
                payout: dec!(1.95),
                purchased_at: Utc::now(),
            }),
        )],
        Outbound::Subscribe(spec) if matches!(spec.target, SubscriptionTarget::Contract(_)) => {
            vec![stream_message(
                envelope.req_id,
                &format!("poc-{}", envelope.req_id),
                InboundBody::Contract(open_update()),
            )]
        }
        Outbound::Forget { .. } => vec![reply(envelope.req_id, InboundBody::Forgotten)],
        _ => Vec::new(),
    }
}
