use std::sync::Arc;
use std::thread;

use chrono::{Duration, Utc};
use uuid::Uuid;

use quad_db::{ChatError, Database};
use quad_types::models::{Decision, Profile, RequestStatus};

fn member(name: &str, campus: &str) -> Profile {
    Profile {
        user_id: Uuid::new_v4(),
        display_name: name.to_string(),
        avatar_url: None,
        campus: campus.to_string(),
    }
}

fn seeded(profiles: &[&Profile]) -> Database {
    let db = Database::open_in_memory().unwrap();
    for p in profiles {
        db.upsert_profile(p, Utc::now()).unwrap();
    }
    db
}

#[test]
fn accepted_room_is_usable_until_it_lapses() {
    let a = member("ada", "north");
    let b = member("bo", "north");
    let db = seeded(&[&a, &b]);
    let t0 = Utc::now();
    let post = Uuid::new_v4();

    let request = db.create_request(&a, b.user_id, post, "hi", t0).unwrap();
    assert_eq!(request.status, RequestStatus::Pending);
    assert_eq!(request.request_expires_at, t0 + Duration::hours(48));
    assert_eq!(request.campus, "north");

    let t1 = t0 + Duration::minutes(5);
    let accepted = db.respond(request.id, b.user_id, Decision::Accept, t1).unwrap();
    let room = accepted.room_id.clone().unwrap();
    assert!(room.starts_with("room_"));
    assert_eq!(accepted.room_expires_at, Some(t1 + Duration::hours(24)));

    let access = db.authorize_room(&room, a.user_id, t1).unwrap();
    assert_eq!(access.other_participant, b.user_id);
    assert_eq!(access.request_id, request.id);

    db.post_message(&room, a.user_id, "hey", t1).unwrap();
    let page = db.list_messages(&room, 100, None).unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].sender_id, a.user_id);

    let outsider = Uuid::new_v4();
    assert!(matches!(
        db.authorize_room(&room, outsider, t1),
        Err(ChatError::Forbidden)
    ));

    let t2 = t1 + Duration::hours(25);
    assert!(matches!(
        db.authorize_room(&room, a.user_id, t2),
        Err(ChatError::RoomExpired)
    ));
    assert!(matches!(
        db.authorize_room(&room, b.user_id, t2),
        Err(ChatError::RoomExpired)
    ));
}

#[test]
fn second_pending_request_for_same_post_is_refused() {
    let a = member("ada", "north");
    let b = member("bo", "north");
    let db = seeded(&[&a, &b]);
    let now = Utc::now();
    let post = Uuid::new_v4();

    db.create_request(&a, b.user_id, post, "hi", now).unwrap();
    assert!(matches!(
        db.create_request(&a, b.user_id, post, "hi again", now),
        Err(ChatError::DuplicatePending)
    ));

    // a different post is a different triple
    db.create_request(&a, b.user_id, Uuid::new_v4(), "other post", now).unwrap();
    // and so is the reverse direction
    db.create_request(&b, a.user_id, post, "back at you", now).unwrap();
}

#[test]
fn answered_request_frees_the_triple() {
    let a = member("ada", "north");
    let b = member("bo", "north");
    let db = seeded(&[&a, &b]);
    let now = Utc::now();
    let post = Uuid::new_v4();

    let first = db.create_request(&a, b.user_id, post, "hi", now).unwrap();
    db.respond(first.id, b.user_id, Decision::Reject, now).unwrap();
    db.create_request(&a, b.user_id, post, "one more try", now).unwrap();
}

#[test]
fn different_campus_is_refused() {
    let a = member("ada", "north");
    let c = member("cy", "south");
    let db = seeded(&[&a, &c]);

    assert!(matches!(
        db.create_request(&a, c.user_id, Uuid::new_v4(), "hi", Utc::now()),
        Err(ChatError::CrossCampus)
    ));
}

#[test]
fn late_accept_expires_the_request() {
    let a = member("ada", "north");
    let b = member("bo", "north");
    let db = seeded(&[&a, &b]);
    let now = Utc::now();
    let request = db.create_request(&a, b.user_id, Uuid::new_v4(), "hi", now).unwrap();

    let late = now + Duration::hours(48) + Duration::seconds(1);
    assert!(matches!(
        db.respond(request.id, b.user_id, Decision::Accept, late),
        Err(ChatError::RequestExpired)
    ));

    let stored = db.get_request(request.id).unwrap();
    assert_eq!(stored.status, RequestStatus::Expired);
    assert!(stored.room_id.is_none());
    assert!(stored.responded_at.is_some());
}

#[test]
fn concurrent_responses_have_one_winner() {
    let a = member("ada", "north");
    let b = member("bo", "north");
    let db = Arc::new(seeded(&[&a, &b]));
    let now = Utc::now();
    let request = db.create_request(&a, b.user_id, Uuid::new_v4(), "hi", now).unwrap();

    let handles: Vec<_> = [Decision::Accept, Decision::Reject, Decision::Accept, Decision::Reject]
        .into_iter()
        .map(|decision| {
            let db = Arc::clone(&db);
            let target = b.user_id;
            thread::spawn(move || db.respond(request.id, target, decision, now))
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, ChatError::AlreadyResponded)));

    let stored = db.get_request(request.id).unwrap();
    let winner = results.into_iter().find_map(Result::ok).unwrap();
    assert_eq!(stored.status, winner.status);
    assert_eq!(stored.room_id, winner.room_id);
}

#[test]
fn every_accepted_request_gets_its_own_room() {
    let a = member("ada", "north");
    let b = member("bo", "north");
    let db = seeded(&[&a, &b]);
    let now = Utc::now();

    let mut rooms = std::collections::HashSet::new();
    for _ in 0..20 {
        let request = db.create_request(&a, b.user_id, Uuid::new_v4(), "hi", now).unwrap();
        let accepted = db.respond(request.id, b.user_id, Decision::Accept, now).unwrap();
        assert!(rooms.insert(accepted.room_id.unwrap()));
    }
}

#[test]
fn messages_in_other_rooms_stay_separate() {
    let a = member("ada", "north");
    let b = member("bo", "north");
    let db = seeded(&[&a, &b]);
    let now = Utc::now();

    let mut rooms = Vec::new();
    for text in ["first", "second"] {
        let r = db.create_request(&a, b.user_id, Uuid::new_v4(), text, now).unwrap();
        let acc = db.respond(r.id, b.user_id, Decision::Accept, now).unwrap();
        let room = acc.room_id.unwrap();
        db.post_message(&room, b.user_id, text, now).unwrap();
        rooms.push(room);
    }

    for (room, text) in rooms.iter().zip(["first", "second"]) {
        let page = db.list_messages(room, 100, None).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].content, text);
    }
}
