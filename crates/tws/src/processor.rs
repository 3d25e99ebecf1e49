//! Socket reader loop.
//!
//! Reads frames from the TWS connection, parses them into
//! [`IncomingMessage`]s, resolves pending requests and emits
//! [`TwsEvent`]s.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use chaindesk_core::broker::BrokerError;
use chaindesk_core::quote::Quote;
use futures::StreamExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio_util::codec::FramedRead;

use crate::client::{Pending, Shared};
use crate::codec::TwsCodec;
use crate::events::TwsEvent;
use crate::messages::{self, IncomingMessage, TickField};

/// Process frames until the socket closes, a read fails, or the
/// connection is shut down locally.
///
/// On exit every pending request fails with
/// [`BrokerError::NotConnected`] and [`TwsEvent::Disconnected`] is sent.
pub(crate) async fn process_messages(mut reader: FramedRead<OwnedReadHalf, TwsCodec>, shared: Arc<Shared>) {
    loop {
        let frame = tokio::select! {
            _ = shared.closed.cancelled() => break,
            frame = reader.next() => frame,
        };

        match frame {
            Some(Ok(fields)) => handle_frame(&fields, &shared),
            Some(Err(e)) => {
                tracing::error!(error = %e, "TWS receive error");
                break;
            }
            None => {
                tracing::info!("TWS closed the connection");
                break;
            }
        }
    }

    let was_connected = shared.connected.swap(false, Ordering::SeqCst);
    shared.closed.cancel();
    shared.fail_all(&BrokerError::NotConnected);
    if was_connected {
        let _ = shared.events.send(TwsEvent::Disconnected);
    }
    tracing::debug!("TWS reader task exited");
}

fn handle_frame(fields: &[String], shared: &Shared) {
    match messages::parse(fields, shared.server_version) {
        Ok(msg) => handle_message(msg, shared),
        Err(e) => {
            tracing::warn!(error = %e, raw_message = ?fields, "Failed to parse TWS message");
        }
    }
}

fn handle_message(msg: IncomingMessage, shared: &Shared) {
    match msg {
        IncomingMessage::TickPrice {
            req_id,
            tick_type,
            price,
        } => handle_tick_price(shared, req_id, tick_type, price),
        IncomingMessage::TickSnapshotEnd { req_id } => {
            if let Some(pending) = shared.take_pending(req_id) {
                pending.complete();
            }
        }
        IncomingMessage::ContractData { req_id, contract } => {
            if let Some(Pending::ContractDetails { found, .. }) = shared.lock_pending().get_mut(&req_id) {
                found.push(*contract);
            }
        }
        IncomingMessage::ContractDataEnd { req_id } | IncomingMessage::SecDefOptParamsEnd { req_id } => {
            if let Some(pending) = shared.take_pending(req_id) {
                pending.complete();
            }
        }
        IncomingMessage::SecDefOptParams { req_id, params } => {
            if let Some(Pending::OptionParams { found, .. }) = shared.lock_pending().get_mut(&req_id) {
                found.push(params);
            }
        }
        IncomingMessage::OrderStatus { order_id, report } => {
            tracing::info!(
                order_id,
                status = %report.status,
                filled = report.filled,
                remaining = report.remaining,
                avg_fill_price = report.avg_fill_price,
                "Order status",
            );
            shared.record_status(order_id, report.clone());
            let _ = shared.events.send(TwsEvent::OrderStatus { order_id, report });
        }
        IncomingMessage::NextValidId(order_id) => {
            shared.next_order_id.fetch_max(order_id, Ordering::SeqCst);
            shared.ready.send_replace(Some(order_id));
            tracing::debug!(order_id, "Next valid order id");
        }
        IncomingMessage::Error {
            req_id,
            code,
            message,
        } => handle_error(shared, req_id, code, message),
        IncomingMessage::OpenOrder { order_id } => {
            tracing::debug!(order_id, "Open order acknowledged");
        }
        IncomingMessage::ManagedAccounts(accounts) => {
            tracing::info!(?accounts, "Managed accounts");
        }
        IncomingMessage::CurrentTime(time) => {
            tracing::debug!(time, "TWS current time");
        }
        IncomingMessage::MarketDataType { req_id, data_type } => {
            tracing::debug!(req_id, data_type, "Market data type");
        }
        IncomingMessage::TickSize { req_id, tick_type, size } => {
            tracing::trace!(req_id, tick_type, size, "Tick size");
        }
        IncomingMessage::TickReqParams { req_id } => {
            tracing::trace!(req_id, "Tick request params");
        }
        IncomingMessage::Unhandled(msg_id) => {
            tracing::trace!(msg_id, "Ignoring unhandled TWS message");
        }
    }
}

fn handle_tick_price(shared: &Shared, req_id: i32, tick_type: i32, price: f64) {
    let (Some(field), Some(price)) = (TickField::from_tick_type(tick_type), Quote::sanitize(price)) else {
        return;
    };
    if let Some(Pending::Snapshot { quote, .. }) = shared.lock_pending().get_mut(&req_id) {
        match field {
            TickField::Bid => quote.bid = Some(price),
            TickField::Ask => quote.ask = Some(price),
            TickField::Last => quote.last = Some(price),
            TickField::Close => quote.close = Some(price),
        }
    }
}

/// Route an ERR_MSG.
///
/// Informational codes are only logged. Connection-loss codes close the
/// session. Anything else tied to a pending request resolves it: code
/// 200 on a contract lookup means "no match" and resolves empty, every
/// other code fails the request.
fn handle_error(shared: &Shared, req_id: i32, code: i32, message: String) {
    if messages::is_informational(code) {
        tracing::info!(code, message = %message, "TWS notice");
        return;
    }
    if messages::is_snapshot_notice(code) {
        tracing::debug!(req_id, code, message = %message, "TWS market data notice");
        return;
    }

    let _ = shared.events.send(TwsEvent::Error {
        req_id,
        code,
        message: message.clone(),
    });

    if messages::is_connection_lost(code) {
        tracing::warn!(code, message = %message, "TWS connectivity lost");
        shared.closed.cancel();
        return;
    }

    match shared.take_pending(req_id) {
        Some(pending @ Pending::ContractDetails { .. }) if code == messages::NO_SECURITY_DEFINITION => {
            tracing::debug!(req_id, message = %message, "No security definition");
            pending.complete();
        }
        Some(pending) => {
            tracing::warn!(req_id, code, message = %message, "TWS request failed");
            pending.fail(BrokerError::Rejected { code, message });
        }
        None if req_id > 0 => {
            // Order ids share this id space.
            tracing::warn!(order_id = req_id, code, message = %message, "TWS order error");
        }
        None => {
            tracing::warn!(code, message = %message, "TWS error");
        }
    }
}
