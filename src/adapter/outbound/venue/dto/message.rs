//! Venue WebSocket message types.
//!
//! Requests are flat JSON objects keyed by their command name. Responses name
//! their `msg_type`, echo the request's `req_id`, and carry either the payload
//! under the key of the same name or an `error` object.
//!
//! Example exchange:
//! ```json
//! {"ticks":"R_100","subscribe":1,"req_id":7}
//! {"msg_type":"tick","req_id":7,"subscription":{"id":"c3f1..."},"tick":{"symbol":"R_100","quote":1234.56,"epoch":1700000000,"pip_size":2}}
//! ```

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::domain::{
    BalanceUpdate, ContractId, ContractStatus, ContractUpdate, Proposal, Purchase, ReqId,
    SubscriptionSpec, SubscriptionTarget, Symbol, TickUpdate,
};
use crate::port::{Envelope, Inbound, InboundBody, OpenContract, Outbound, VenueError};

/// Outbound request, serialised as the venue's flat command object.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum VenueRequest<'a> {
    Authorize {
        authorize: &'a str,
        req_id: u64,
    },
    Ping {
        ping: u8,
        req_id: u64,
    },
    Ticks {
        ticks: &'a str,
        subscribe: u8,
        req_id: u64,
    },
    OpenContract {
        proposal_open_contract: u8,
        contract_id: Value,
        subscribe: u8,
        req_id: u64,
    },
    Balance {
        balance: u8,
        subscribe: u8,
        req_id: u64,
    },
    Forget {
        forget: &'a str,
        req_id: u64,
    },
    Proposal(ProposalRequest<'a>),
    Buy {
        buy: &'a str,
        #[serde(with = "rust_decimal::serde::float")]
        price: Decimal,
        req_id: u64,
    },
    Portfolio {
        portfolio: u8,
        req_id: u64,
    },
}

/// Stake-basis price request for one digit contract.
#[derive(Debug, Serialize)]
pub struct ProposalRequest<'a> {
    pub proposal: u8,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub basis: &'static str,
    pub contract_type: &'static str,
    pub currency: &'a str,
    pub duration: u32,
    pub duration_unit: &'static str,
    pub symbol: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub barrier: Option<String>,
    pub req_id: u64,
}

impl<'a> VenueRequest<'a> {
    #[must_use]
    pub fn from_envelope(envelope: &'a Envelope) -> Self {
        let req_id = envelope.req_id.value();
        match &envelope.body {
            Outbound::Authorize { token } => Self::Authorize {
                authorize: token.expose(),
                req_id,
            },
            Outbound::Ping => Self::Ping { ping: 1, req_id },
            Outbound::Subscribe(spec) => Self::subscribe(spec, req_id),
            Outbound::Forget { subscription_id } => Self::Forget {
                forget: subscription_id,
                req_id,
            },
            Outbound::Proposal { request, currency } => Self::Proposal(ProposalRequest {
                proposal: 1,
                amount: request.stake,
                basis: "stake",
                contract_type: request.contract_type.as_str(),
                currency,
                duration: request.duration,
                duration_unit: request.duration_unit.as_str(),
                symbol: request.symbol.as_str(),
                barrier: request
                    .contract_type
                    .needs_barrier()
                    .then(|| request.barrier.map(|b| b.to_string()))
                    .flatten(),
                req_id,
            }),
            Outbound::Buy { proposal_id, price } => Self::Buy {
                buy: proposal_id,
                price: *price,
                req_id,
            },
            Outbound::Portfolio => Self::Portfolio { portfolio: 1, req_id },
        }
    }

    fn subscribe(spec: &'a SubscriptionSpec, req_id: u64) -> Self {
        match &spec.target {
            SubscriptionTarget::Symbol(symbol) => Self::Ticks {
                ticks: symbol.as_str(),
                subscribe: 1,
                req_id,
            },
            SubscriptionTarget::Contract(contract_id) => Self::OpenContract {
                proposal_open_contract: 1,
                contract_id: contract_id_value(contract_id),
                subscribe: 1,
                req_id,
            },
            SubscriptionTarget::Account => Self::Balance {
                balance: 1,
                subscribe: 1,
                req_id,
            },
        }
    }
}

/// Contract ids go out as numbers when they are numeric.
fn contract_id_value(id: &ContractId) -> Value {
    id.as_str()
        .parse::<u64>()
        .map_or_else(|_| Value::String(id.as_str().to_string()), Value::from)
}

/// Any response from the venue.
#[derive(Debug, Deserialize)]
pub struct VenueResponse {
    pub msg_type: String,
    #[serde(default)]
    pub req_id: Option<u64>,
    #[serde(default)]
    pub error: Option<WireError>,
    #[serde(default)]
    pub subscription: Option<WireSubscription>,
    #[serde(default)]
    pub authorize: Option<WireAuthorize>,
    #[serde(default)]
    pub tick: Option<WireTick>,
    #[serde(default)]
    pub proposal: Option<WireProposal>,
    #[serde(default)]
    pub buy: Option<WireBuy>,
    #[serde(default)]
    pub proposal_open_contract: Option<WireOpenContract>,
    #[serde(default)]
    pub balance: Option<WireBalance>,
    #[serde(default)]
    pub portfolio: Option<WirePortfolio>,
}

#[derive(Debug, Deserialize)]
pub struct WireError {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct WireSubscription {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct WireAuthorize {
    #[serde(default)]
    pub loginid: String,
}

#[derive(Debug, Deserialize)]
pub struct WireTick {
    pub symbol: String,
    /// Kept as the JSON number's own text so no float rounding creeps in.
    pub quote: serde_json::Number,
    pub epoch: i64,
    #[serde(default)]
    pub pip_size: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct WireProposal {
    pub id: String,
    pub ask_price: Decimal,
    pub payout: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct WireBuy {
    #[serde(deserialize_with = "id_text")]
    pub contract_id: String,
    pub buy_price: Decimal,
    pub payout: Decimal,
    pub purchase_time: i64,
}

#[derive(Debug, Deserialize)]
pub struct WireOpenContract {
    #[serde(default, deserialize_with = "opt_id_text")]
    pub contract_id: Option<String>,
    #[serde(default, deserialize_with = "flag")]
    pub is_sold: bool,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub profit: Option<Decimal>,
    #[serde(default)]
    pub payout: Option<Decimal>,
    #[serde(default)]
    pub exit_tick_time: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct WireBalance {
    pub balance: Decimal,
    #[serde(default)]
    pub currency: String,
}

#[derive(Debug, Deserialize)]
pub struct WirePortfolio {
    #[serde(default)]
    pub contracts: Vec<WirePortfolioContract>,
}

#[derive(Debug, Deserialize)]
pub struct WirePortfolioContract {
    #[serde(deserialize_with = "id_text")]
    pub contract_id: String,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub contract_type: String,
    pub buy_price: Decimal,
    pub payout: Decimal,
    pub purchase_time: i64,
}

impl VenueResponse {
    /// Convert into the transport-level inbound message.
    #[must_use]
    pub fn into_inbound(self) -> Inbound {
        let req_id = self.req_id.map(ReqId::new);
        let subscription_id = self.subscription.map(|s| s.id);
        let msg_type = self.msg_type;

        let body = if let Some(error) = self.error {
            InboundBody::Error(VenueError {
                code: error.code,
                message: error.message,
                msg_type,
            })
        } else {
            match msg_type.as_str() {
                "authorize" => match self.authorize {
                    Some(auth) => InboundBody::Authorized {
                        login_id: auth.loginid,
                    },
                    None => InboundBody::Other { msg_type },
                },
                "ping" => InboundBody::Pong,
                "forget" => InboundBody::Forgotten,
                "tick" => match self.tick {
                    Some(tick) => InboundBody::Tick(tick.into()),
                    None => InboundBody::Other { msg_type },
                },
                "proposal" => match self.proposal {
                    Some(p) => InboundBody::Proposal(Proposal {
                        id: p.id,
                        ask_price: p.ask_price,
                        payout: p.payout,
                    }),
                    None => InboundBody::Other { msg_type },
                },
                "buy" => match self.buy {
                    Some(buy) => InboundBody::Bought(Purchase {
                        contract_id: ContractId::new(buy.contract_id),
                        buy_price: buy.buy_price,
                        payout: buy.payout,
                        purchased_at: epoch_to_utc(buy.purchase_time),
                    }),
                    None => InboundBody::Other { msg_type },
                },
                "proposal_open_contract" => match self.proposal_open_contract.and_then(WireOpenContract::into_update) {
                    Some(update) => InboundBody::Contract(update),
                    None => InboundBody::Other { msg_type },
                },
                "balance" => match self.balance {
                    Some(b) => InboundBody::Balance(BalanceUpdate {
                        balance: b.balance,
                        currency: b.currency,
                    }),
                    None => InboundBody::Other { msg_type },
                },
                "portfolio" => InboundBody::Portfolio(
                    self.portfolio
                        .map(|p| p.contracts.into_iter().map(Into::into).collect())
                        .unwrap_or_default(),
                ),
                _ => InboundBody::Other { msg_type },
            }
        };

        Inbound {
            req_id,
            subscription_id,
            body,
        }
    }
}

impl From<WireTick> for TickUpdate {
    fn from(tick: WireTick) -> Self {
        Self {
            symbol: Symbol::new(tick.symbol),
            quote: tick.quote.to_string(),
            epoch: tick.epoch,
            pip_size: tick.pip_size,
        }
    }
}

impl WireOpenContract {
    /// `None` for the empty object the venue sends before the contract exists.
    fn into_update(self) -> Option<ContractUpdate> {
        let contract_id = ContractId::new(self.contract_id?);
        let status = self.status.as_deref().and_then(|s| match s {
            "open" => Some(ContractStatus::Open),
            "won" => Some(ContractStatus::Won),
            "lost" => Some(ContractStatus::Lost),
            "sold" => Some(ContractStatus::Sold),
            _ => None,
        });
        Some(ContractUpdate {
            contract_id,
            is_sold: self.is_sold,
            status,
            profit: self.profit.unwrap_or_default(),
            payout: self.payout.unwrap_or_default(),
            exit_epoch: self.exit_tick_time,
        })
    }
}

impl From<WirePortfolioContract> for OpenContract {
    fn from(c: WirePortfolioContract) -> Self {
        Self {
            contract_id: ContractId::new(c.contract_id),
            symbol: c.symbol,
            contract_type: c.contract_type,
            buy_price: c.buy_price,
            payout: c.payout,
            purchased_at: epoch_to_utc(c.purchase_time),
        }
    }
}

fn epoch_to_utc(epoch: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(epoch, 0).single().unwrap_or_else(Utc::now)
}

fn id_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Number(n) => Ok(n.to_string()),
        Value::String(s) => Ok(s),
        other => Err(serde::de::Error::custom(format!("invalid id: {other}"))),
    }
}

fn opt_id_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(other) => Err(serde::de::Error::custom(format!("invalid id: {other}"))),
    }
}

/// The venue sends flags as 0/1.
fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Bool(b)) => b,
        Some(Value::Number(n)) => n.as_i64().is_some_and(|n| n != 0),
        _ => false,
    })
}

/// Serialise an envelope to its wire text.
///
/// # Errors
///
/// Returns an error if serialisation fails.
pub fn encode(envelope: &Envelope) -> serde_json::Result<String> {
    serde_json::to_string(&VenueRequest::from_envelope(envelope))
}

/// Parse one text frame.
///
/// # Errors
///
/// Returns an error if the frame is not a venue response.
pub fn decode(text: &str) -> serde_json::Result<Inbound> {
    serde_json::from_str::<VenueResponse>(text).map(VenueResponse::into_inbound)
}
