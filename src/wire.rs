use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, warn};
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::limits::MAX_LINE_LEN;
use crate::model::*;
use crate::observability::{request_label, REQUESTS_TOTAL, REQUEST_DURATION_SECONDS};
use crate::protocol::{
    failure_line, notice_line, parse_request, success_line, ErrorBody, ProtocolError, Request,
};

/// Per-connection state.
#[derive(Default)]
struct Session {
    subscription: Option<broadcast::Receiver<Notice>>,
}

enum Input {
    Line(Option<Result<String, LinesCodecError>>),
    Notice(Option<Notice>),
}

#[derive(Serialize)]
struct RoomRef {
    room_id: Ulid,
}

#[derive(Serialize)]
struct Availability {
    available: bool,
    conflicts: Vec<ConflictInfo>,
}

#[derive(Serialize)]
struct BusyDay {
    room_id: Ulid,
    day: NaiveDate,
    busy: Vec<Interval>,
}

#[derive(Serialize)]
struct Slots {
    room_id: Ulid,
    first_day: NaiveDate,
    days: u32,
    slots: Vec<FreeSlot>,
}

#[derive(Serialize)]
struct Subscription {
    subscribed: bool,
    room_id: Option<Ulid>,
}

/// Serve one client until it disconnects. Requests are answered in order;
/// notices are interleaved between responses once the client subscribes.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
) -> Result<(), LinesCodecError> {
    let framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));
    let (mut sink, mut lines) = framed.split();
    let mut session = Session::default();

    loop {
        let input = tokio::select! {
            line = lines.next() => Input::Line(line),
            notice = next_notice(&mut session.subscription) => Input::Notice(notice),
        };
        match input {
            Input::Line(None) => break,
            Input::Line(Some(Ok(line))) => {
                if line.trim().is_empty() {
                    continue;
                }
                let response = handle_line(&engine, &mut session, &line).await;
                sink.send(response).await?;
            }
            Input::Line(Some(Err(LinesCodecError::MaxLineLengthExceeded))) => {
                let err = ProtocolError::TooLong(MAX_LINE_LEN + 1);
                metrics::counter!(REQUESTS_TOTAL, "op" => "unknown", "status" => "error")
                    .increment(1);
                sink.send(failure_line(&ErrorBody::from(&err))).await?;
            }
            Input::Line(Some(Err(e))) => return Err(e),
            Input::Notice(Some(notice)) => sink.send(notice_line(&notice)).await?,
            Input::Notice(None) => session.subscription = None,
        }
    }
    Ok(())
}

/// Next notice for a subscribed connection; never resolves otherwise.
/// `None` means the channel closed.
async fn next_notice(subscription: &mut Option<broadcast::Receiver<Notice>>) -> Option<Notice> {
    let Some(rx) = subscription else {
        return std::future::pending().await;
    };
    loop {
        match rx.recv().await {
            Ok(notice) => return Some(notice),
            Err(RecvError::Lagged(n)) => warn!("slow subscriber skipped {n} notices"),
            Err(RecvError::Closed) => return None,
        }
    }
}

async fn handle_line(engine: &Engine, session: &mut Session, line: &str) -> String {
    let req = match parse_request(line) {
        Ok(req) => req,
        Err(e) => {
            debug!("unparseable request: {e}");
            metrics::counter!(REQUESTS_TOTAL, "op" => "unknown", "status" => "error").increment(1);
            return failure_line(&ErrorBody::from(&e));
        }
    };

    let op = request_label(&req);
    let started = Instant::now();
    let result = execute(engine, session, req).await;
    metrics::histogram!(REQUEST_DURATION_SECONDS, "op" => op)
        .record(started.elapsed().as_secs_f64());
    let status = if result.is_ok() { "ok" } else { "error" };
    metrics::counter!(REQUESTS_TOTAL, "op" => op, "status" => status).increment(1);

    match result {
        Ok(line) => line,
        Err(e) => {
            debug!("{op} rejected: {e}");
            failure_line(&ErrorBody::from(&e))
        }
    }
}

async fn execute(
    engine: &Engine,
    session: &mut Session,
    req: Request,
) -> Result<String, EngineError> {
    match req {
        Request::RegisterRoom { room } => {
            let room_id = room.id;
            engine.register_room(room).await?;
            Ok(success_line(&RoomRef { room_id }))
        }
        Request::SetRoomStatus { room_id, status } => {
            engine.set_room_status(room_id, status).await?;
            Ok(success_line(&RoomRef { room_id }))
        }
        Request::ListRooms => Ok(success_line(&engine.list_rooms().await)),
        Request::CheckAvailability { room_id, stay } => {
            let conflicts = engine.check_availability(room_id, stay).await?;
            Ok(success_line(&Availability {
                available: conflicts.is_empty(),
                conflicts,
            }))
        }
        Request::MergeBusy { room_id, day } => {
            let busy = engine.merge_busy(room_id, day).await?;
            Ok(success_line(&BusyDay { room_id, day, busy }))
        }
        Request::FreeSlots {
            room_id,
            window_days,
        } => {
            let free = engine.free_slots(room_id, window_days).await?;
            Ok(success_line(&Slots {
                room_id,
                first_day: free.first_day(),
                days: free.days(),
                slots: free.iter().collect(),
            }))
        }
        Request::SuggestRooms { reservation_id } => {
            Ok(success_line(&engine.suggest_rooms(reservation_id).await?))
        }
        Request::Quote {
            room_id,
            stay,
            addons,
            services,
        } => Ok(success_line(
            &engine.quote(room_id, &stay, &addons, &services).await?,
        )),
        Request::CreateReservation { reservation } => {
            Ok(success_line(&engine.create_reservation(reservation).await?))
        }
        Request::GetReservation { reservation_id } => {
            Ok(success_line(&engine.get_reservation(reservation_id).await?))
        }
        Request::ListReservations { room_id } => {
            Ok(success_line(&engine.list_reservations(room_id).await?))
        }
        Request::Transition {
            reservation_id,
            action,
        } => Ok(success_line(&engine.transition(reservation_id, action).await?)),
        Request::ChangeRoom {
            reservation_id,
            new_room_id,
        } => Ok(success_line(
            &engine.change_room(reservation_id, new_room_id).await?,
        )),
        Request::Reschedule {
            reservation_id,
            stay,
        } => Ok(success_line(&engine.reschedule(reservation_id, stay).await?)),
        Request::RecordRefund {
            reservation_id,
            amount,
        } => Ok(success_line(
            &engine.record_refund(reservation_id, amount).await?,
        )),
        Request::Subscribe { room_id } => {
            let rx = match room_id {
                Some(id) => {
                    if engine.get_room(&id).is_none() {
                        return Err(EngineError::NotFound(id));
                    }
                    engine.notify.subscribe_room(id)
                }
                None => engine.notify.subscribe_all(),
            };
            session.subscription = Some(rx);
            Ok(success_line(&Subscription {
                subscribed: true,
                room_id,
            }))
        }
        Request::Unsubscribe => {
            session.subscription = None;
            Ok(success_line(&Subscription {
                subscribed: false,
                room_id: None,
            }))
        }
        Request::Ping => Ok(success_line(&"pong")),
    }
}
