use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LinesCodec};
use ulid::Ulid;

use innkeep::engine::{Collaborators, Engine};
use innkeep::notify::NotifyHub;
use innkeep::wire;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<Engine>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("innkeep_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let engine = Arc::new(
        Engine::new(
            dir.join("innkeep.wal"),
            Arc::new(NotifyHub::new()),
            Collaborators::in_memory(),
        )
        .unwrap(),
    );

    let served = engine.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let engine = served.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, engine).await;
            });
        }
    });

    (addr, engine)
}

struct Client {
    framed: Framed<TcpStream, LinesCodec>,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let socket = TcpStream::connect(addr).await.unwrap();
        Self {
            framed: Framed::new(socket, LinesCodec::new()),
        }
    }

    async fn send_raw(&mut self, line: &str) {
        self.framed.send(line.to_string()).await.unwrap();
    }

    async fn next(&mut self) -> Value {
        let line = tokio::time::timeout(Duration::from_secs(5), self.framed.next())
            .await
            .expect("timed out waiting for a line")
            .expect("connection closed")
            .unwrap();
        serde_json::from_str(&line).unwrap()
    }

    async fn call(&mut self, req: Value) -> Value {
        self.send_raw(&req.to_string()).await;
        self.next().await
    }

    async fn ok(&mut self, req: Value) -> Value {
        let resp = self.call(req).await;
        assert_eq!(resp["ok"], json!(true), "unexpected failure: {resp}");
        resp["data"].clone()
    }
}

fn at(date: &str, time: &str) -> Value {
    json!({ "date": date, "time": time })
}

fn room(number: u32) -> (String, Value) {
    let id = Ulid::new().to_string();
    let req = json!({
        "op": "register_room",
        "room": {
            "id": id,
            "number": number,
            "floor": 1,
            "category": "standard",
            "room_type": "double",
            "status": "available",
            "tariff": { "first_hour": 50, "additional_hour": 20, "overnight": 200, "daily": 400 },
            "addons": []
        }
    });
    (id, req)
}

fn daily(room_id: &str, from: Value, to: Value, method: &str) -> Value {
    json!({
        "op": "create_reservation",
        "reservation": {
            "room_id": room_id,
            "guest": { "walk_in": { "name": "Linh Tran", "phone": "0901 234 567" } },
            "stay": { "daily": { "check_in": from, "check_out": to } },
            "payment_method": method
        }
    })
}

fn hourly(room_id: &str, from: Value, hours: u32) -> Value {
    json!({
        "op": "create_reservation",
        "reservation": {
            "room_id": room_id,
            "guest": { "walk_in": { "name": "Bao Le", "phone": "0902 000 111" } },
            "stay": { "hourly": { "check_in": from, "hours": hours } },
            "payment_method": "cash"
        }
    })
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn ping_and_malformed_lines() {
    let (addr, _engine) = start_test_server().await;
    let mut client = Client::connect(addr).await;

    assert_eq!(client.call(json!({"op": "ping"})).await, json!({"ok": true, "data": "pong"}));

    client.send_raw("{not json").await;
    let resp = client.next().await;
    assert_eq!(resp["ok"], json!(false));
    assert_eq!(resp["error"]["kind"], json!("InvalidRequest"));

    let resp = client.call(json!({"op": "teleport"})).await;
    assert_eq!(resp["error"]["kind"], json!("InvalidRequest"));

    // The connection survives bad input.
    assert_eq!(client.ok(json!({"op": "ping"})).await, json!("pong"));
}

#[tokio::test]
async fn booking_conflict_over_the_wire() {
    let (addr, _engine) = start_test_server().await;
    let mut client = Client::connect(addr).await;

    let (room_id, register) = room(101);
    assert_eq!(client.ok(register).await["room_id"], json!(room_id));

    let first = client
        .ok(daily(
            &room_id,
            at("2030-10-24", "14:00:00"),
            at("2030-10-27", "12:00:00"),
            "cash",
        ))
        .await;
    assert_eq!(first["charges"]["total"], json!(1200));
    assert_eq!(first["status"], json!("pending"));

    let resp = client
        .call(hourly(&room_id, at("2030-10-25", "10:00:00"), 2))
        .await;
    assert_eq!(resp["ok"], json!(false));
    assert_eq!(resp["error"]["kind"], json!("ScheduleConflict"));
    assert_eq!(resp["error"]["detail"][0]["reservation_id"], first["id"]);

    let avail = client
        .ok(json!({
            "op": "check_availability",
            "room_id": room_id,
            "stay": { "start": at("2030-10-27", "12:00:00"), "end": at("2030-10-27", "15:00:00") }
        }))
        .await;
    assert_eq!(avail["available"], json!(true));

    let busy = client
        .ok(json!({"op": "merge_busy", "room_id": room_id, "day": "2030-10-25"}))
        .await;
    assert_eq!(busy["busy"].as_array().unwrap().len(), 1);

    let quote = client
        .ok(json!({
            "op": "quote",
            "room_id": room_id,
            "stay": { "hourly": { "check_in": at("2030-11-01", "10:00:00"), "hours": 3 } }
        }))
        .await;
    assert_eq!(quote["charges"]["total"], json!(90));

    let rooms = client.ok(json!({"op": "list_rooms"})).await;
    assert_eq!(rooms[0]["active_reservations"], json!(1));
}

#[tokio::test]
async fn lifecycle_and_room_change_over_the_wire() {
    let (addr, _engine) = start_test_server().await;
    let mut client = Client::connect(addr).await;

    let (r1, register) = room(101);
    client.ok(register).await;
    let (r2, register) = room(102);
    client.ok(register).await;

    let res = client
        .ok(hourly(&r1, at("2030-10-24", "10:00:00"), 3))
        .await;
    let id = res["id"].clone();

    let out = client
        .ok(json!({"op": "transition", "reservation_id": id, "action": "confirm_booking"}))
        .await;
    assert_eq!(out["reservation"]["status"], json!("confirmed"));

    let resp = client
        .call(json!({"op": "transition", "reservation_id": id, "action": "confirm_booking"}))
        .await;
    assert_eq!(resp["error"]["kind"], json!("AlreadyInState"));

    let suggestions = client
        .ok(json!({"op": "suggest_rooms", "reservation_id": id}))
        .await;
    assert_eq!(suggestions[0]["room_id"], json!(r2));
    assert_eq!(suggestions[0]["recommended"], json!(true));

    let moved = client
        .ok(json!({"op": "change_room", "reservation_id": id, "new_room_id": r2}))
        .await;
    assert_eq!(moved["reservation"]["room_id"], json!(r2));
    assert_eq!(moved["refund_due"], Value::Null);

    let fetched = client
        .ok(json!({"op": "get_reservation", "reservation_id": id}))
        .await;
    assert_eq!(fetched, moved["reservation"]);

    let on_r1 = client
        .ok(json!({"op": "list_reservations", "room_id": r1}))
        .await;
    assert!(on_r1.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn subscribers_receive_notices() {
    let (addr, _engine) = start_test_server().await;
    let mut staff = Client::connect(addr).await;
    let mut listener = Client::connect(addr).await;

    let (room_id, register) = room(101);
    staff.ok(register).await;

    let sub = listener
        .ok(json!({"op": "subscribe", "room_id": room_id}))
        .await;
    assert_eq!(sub["subscribed"], json!(true));

    let resp = listener
        .call(json!({"op": "subscribe", "room_id": Ulid::new().to_string()}))
        .await;
    assert_eq!(resp["error"]["kind"], json!("NotFound"));

    let res = staff
        .ok(hourly(&room_id, at("2030-10-24", "10:00:00"), 2))
        .await;
    let out = staff
        .ok(json!({
            "op": "transition",
            "reservation_id": res["id"],
            "action": { "cancel": { "reason": "no show" } }
        }))
        .await;
    assert_eq!(out["reservation"]["status"], json!("cancelled"));
    assert_eq!(out["refund_due"], json!(0));

    let notice = listener.next().await;
    let cancelled = &notice["notice"]["reservation_cancelled"];
    assert_eq!(cancelled["reservation_id"], res["id"]);
    assert_eq!(cancelled["refund_due"], json!(0));

    let unsub = listener.ok(json!({"op": "unsubscribe"})).await;
    assert_eq!(unsub["subscribed"], json!(false));
}

#[tokio::test]
async fn free_slots_window_limits() {
    let (addr, _engine) = start_test_server().await;
    let mut client = Client::connect(addr).await;

    let (room_id, register) = room(101);
    client.ok(register).await;

    let slots = client
        .ok(json!({"op": "free_slots", "room_id": room_id, "window_days": 2}))
        .await;
    assert_eq!(slots["days"], json!(2));
    // Nothing booked: one whole-day slot per day.
    assert_eq!(slots["slots"].as_array().unwrap().len(), 2);

    let resp = client
        .call(json!({"op": "free_slots", "room_id": room_id, "window_days": 400}))
        .await;
    assert_eq!(resp["error"]["kind"], json!("LimitExceeded"));
}
