use glam::{Vec2, Vec3};

use shellnet::entity::{Entity, Health};
use shellnet::net::{LoopbackHub, SyncMessage};
use shellnet::sync::{RecordFrame, Route, SpawnSpec, StateRecord};
use shellnet::{
    BlueprintRegistry, NetId, NetworkMode, Phase, Replicator, RetryPolicy, Role, SERVER_SESSION,
    Session, SessionDirectory, SessionId, SyncConfig,
};

const BLUEPRINTS: &str = r#"
[[blueprint]]
name = "Scout"
kind = "craft"
credits = 100
power = 10
main_weapon = { name = "bullet", cooldown = 0.5 }
parts = [
    { location = [2.0, 0.0], ability = { name = "missile", cooldown = 2.0 } },
    { location = [-2.0, 0.0] },
]

[[blueprint]]
name = "Trader"
kind = "vendor"
stock = [{ name = "shield", cost = 60, stock = 3 }]

[[blueprint]]
name = "Beacon"
"#;

fn blueprints() -> BlueprintRegistry {
    BlueprintRegistry::from_toml_str(BLUEPRINTS).unwrap()
}

fn authority(mode: NetworkMode) -> Replicator {
    Replicator::new(
        Session::new(mode, SERVER_SESSION, 2),
        blueprints(),
        SyncConfig::default(),
    )
}

fn observer(session: SessionId) -> Replicator {
    Replicator::new(
        Session::new(NetworkMode::Client, session, 2),
        blueprints(),
        SyncConfig::default(),
    )
}

fn husk(replicator: &Replicator, net_id: NetId) -> &Entity {
    let handle = replicator
        .adapter(net_id)
        .and_then(|a| a.husk())
        .expect("adapter has no husk");
    replicator.world().get(handle).expect("husk missing from world")
}

fn scout_player(name: &str) -> Option<SpawnSpec> {
    Some(SpawnSpec::player("Scout", name, Vec3::ZERO))
}

#[test]
fn observer_husk_starts_with_authority_health() {
    let mut hub = LoopbackHub::new(authority(NetworkMode::Server));
    let raider = hub
        .authority_mut()
        .spawn(
            SERVER_SESSION,
            SpawnSpec::npc("Scout", "raider-1", 1, Vec3::new(10.0, 0.0, 0.0)),
        )
        .unwrap();
    hub.connect(observer(1), None).unwrap();
    hub.run(3).unwrap();

    let view = hub.observer(1).unwrap();
    let adapter = view.adapter(raider).unwrap();
    assert_eq!(adapter.phase(), Phase::Bound(Role::Observer));
    assert_eq!(adapter.entity_id(), Some("raider-1"));

    let entity = husk(view, raider);
    assert_eq!(entity.health, Health::new(1000.0, 250.0, 500.0));
    assert_eq!(entity.position, Vec3::new(10.0, 0.0, 0.0));
    assert_eq!(entity.faction, 1);
    assert!(entity.husk);
}

#[test]
fn detached_part_disappears_everywhere_once() {
    let mut hub = LoopbackHub::new(authority(NetworkMode::Server));
    let raider = hub
        .authority_mut()
        .spawn(SERVER_SESSION, SpawnSpec::npc("Scout", "raider-1", 1, Vec3::ZERO))
        .unwrap();
    hub.connect(observer(1), None).unwrap();
    hub.connect(observer(2), None).unwrap();
    hub.run(4).unwrap();

    let location = Vec2::new(2.0, 0.0);
    assert!(hub.authority_mut().detach_part(raider, location).unwrap());
    hub.step().unwrap();

    for session in [1, 2] {
        let entity = husk(hub.observer(session).unwrap(), raider);
        assert!(entity.network_parts().all(|p| p.location != location));
        assert_eq!(entity.network_parts().count(), 1);
        assert_eq!(entity.parts.iter().filter(|p| p.location == location).count(), 1);
    }

    assert!(!hub.authority_mut().detach_part(raider, location).unwrap());
    assert!(!hub
        .authority_mut()
        .detach_part(raider, Vec2::new(9.0, 9.0))
        .unwrap());
    hub.run(2).unwrap();
    let table = hub.observer(1).unwrap().adapter(raider).unwrap().parts();
    assert_eq!(table.detached().count(), 1);
    assert_eq!(husk(hub.observer(2).unwrap(), raider).network_parts().count(), 1);
}

#[test]
fn player_disconnect_releases_everything_once() {
    let mut hub = LoopbackHub::new(authority(NetworkMode::Server));
    let player = hub.connect(observer(1), scout_player("ace")).unwrap().unwrap();
    hub.connect(observer(2), None).unwrap();
    hub.run(5).unwrap();

    assert!(hub.authority().session().is_player_spawned(1));
    assert_eq!(hub.authority().session().player_count(), 1);

    let own = hub.observer(1).unwrap();
    assert_eq!(own.adapter(player).unwrap().husk(), own.world().local_player());
    let other = hub.observer(2).unwrap();
    let remote = other.adapter(player).unwrap().husk().unwrap();
    assert_eq!(other.world().find_by_id("player-1"), Some(remote));
    assert_eq!(other.world().player_name(remote), Some("ace"));

    hub.disconnect(1).unwrap();

    let session = hub.authority().session();
    assert!(!session.is_player_spawned(1));
    assert_eq!(session.player_count(), 0);
    assert!(hub.authority().adapter(player).is_none());
    assert_eq!(hub.authority().world().find_by_id("player-1"), None);

    let other = hub.observer(2).unwrap();
    assert!(other.adapter(player).is_none());
    assert!(!other.world().contains(remote));

    assert_eq!(hub.authority_mut().session_left(1).unwrap(), 0);
    assert_eq!(hub.authority().session().player_count(), 0);
}

#[test]
fn purchase_from_wrong_owner_changes_nothing() {
    let mut hub = LoopbackHub::new(authority(NetworkMode::Server));
    let trader = hub
        .authority_mut()
        .spawn(
            SERVER_SESSION,
            SpawnSpec::npc("Trader", "trader", 0, Vec3::new(5.0, 0.0, 0.0)),
        )
        .unwrap();
    let ace = hub.connect(observer(1), scout_player("ace")).unwrap().unwrap();
    hub.connect(observer(2), scout_player("bob")).unwrap();
    hub.run(6).unwrap();

    let version = hub.authority().adapter(ace).unwrap().record_version();

    hub.observer_mut(2)
        .unwrap()
        .request_vendor_purchase(ace, 0, trader)
        .unwrap();
    hub.step().unwrap();

    let server = hub.authority();
    let buyer = husk(server, ace).craft().unwrap();
    assert_eq!(buyer.credits, 100);
    assert!(buyer.cargo.is_empty());
    let vendor = husk(server, trader);
    let shellnet::EntityKind::Vendor(stock) = &vendor.kind else {
        panic!("trader lost its vendor capability");
    };
    assert_eq!(stock.item(0).unwrap().stock, 3);
    assert_eq!(server.adapter(ace).unwrap().record_version(), version);

    hub.observer_mut(1)
        .unwrap()
        .request_vendor_purchase(ace, 0, trader)
        .unwrap();
    hub.step().unwrap();

    let server = hub.authority();
    let buyer = husk(server, ace).craft().unwrap();
    assert_eq!(buyer.credits, 40);
    assert_eq!(buyer.cargo, vec!["shield".to_string()]);
}

#[test]
fn small_changes_do_not_reach_observers() {
    let mut hub = LoopbackHub::new(authority(NetworkMode::Server));
    let a = hub
        .authority_mut()
        .spawn(SERVER_SESSION, SpawnSpec::npc("Scout", "a", 1, Vec3::ZERO))
        .unwrap();
    hub.authority_mut()
        .spawn(SERVER_SESSION, SpawnSpec::npc("Scout", "b", 1, Vec3::new(20.0, 0.0, 0.0)))
        .unwrap();
    hub.connect(observer(1), None).unwrap();
    hub.run(5).unwrap();

    let version = hub.observer(1).unwrap().adapter(a).unwrap().record_version();
    let handle = hub.authority().adapter(a).unwrap().husk().unwrap();

    hub.authority_mut().world_mut().get_mut(handle).unwrap().position.x += 0.3;
    hub.step().unwrap();
    assert_eq!(
        hub.observer(1).unwrap().adapter(a).unwrap().record_version(),
        version
    );

    hub.authority_mut().world_mut().get_mut(handle).unwrap().position.x += 2.0;
    hub.step().unwrap();
    let view = hub.observer(1).unwrap();
    assert_eq!(view.adapter(a).unwrap().record_version(), version + 1);
    assert!((husk(view, a).position.x - 2.3).abs() < 1e-4);
}

#[test]
fn lonely_entities_stop_replicating() {
    let mut hub = LoopbackHub::new(authority(NetworkMode::Server));
    let drifter = hub
        .authority_mut()
        .spawn(SERVER_SESSION, SpawnSpec::npc("Scout", "drifter", 1, Vec3::ZERO))
        .unwrap();
    hub.connect(observer(1), None).unwrap();
    hub.run(5).unwrap();

    let version = hub.observer(1).unwrap().adapter(drifter).unwrap().record_version();
    let handle = hub.authority().adapter(drifter).unwrap().husk().unwrap();
    hub.authority_mut().world_mut().get_mut(handle).unwrap().position.x += 50.0;
    hub.run(3).unwrap();

    assert_eq!(
        hub.observer(1).unwrap().adapter(drifter).unwrap().record_version(),
        version
    );
}

#[test]
fn observer_ticks_never_author_records() {
    let mut hub = LoopbackHub::new(authority(NetworkMode::Server));
    let raider = hub
        .authority_mut()
        .spawn(SERVER_SESSION, SpawnSpec::npc("Scout", "raider-1", 1, Vec3::ZERO))
        .unwrap();
    hub.connect(observer(1), None).unwrap();
    hub.run(4).unwrap();

    let view = hub.observer_mut(1).unwrap();
    let version = view.adapter(raider).unwrap().record_version();
    let record = *view.adapter(raider).unwrap().record();
    for _ in 0..50 {
        view.tick();
    }
    assert_eq!(view.adapter(raider).unwrap().record_version(), version);
    assert_eq!(*view.adapter(raider).unwrap().record(), record);
    assert!(view
        .drain_outbox()
        .iter()
        .all(|(_, m)| !matches!(m, SyncMessage::State { .. })));
}

#[test]
fn only_the_latest_tractor_request_applies() {
    let mut hub = LoopbackHub::new(authority(NetworkMode::Server));
    let ace = hub.connect(observer(1), scout_player("ace")).unwrap().unwrap();
    let near = hub
        .authority_mut()
        .spawn(SERVER_SESSION, SpawnSpec::npc("Beacon", "beacon", 0, Vec3::X))
        .unwrap();
    hub.run(5).unwrap();

    let far = hub
        .authority_mut()
        .spawn(SERVER_SESSION, SpawnSpec::npc("Beacon", "crate", 0, Vec3::Y))
        .unwrap();
    hub.observer_mut(1)
        .unwrap()
        .request_tractor_target(ace, Some(far))
        .unwrap();
    hub.pump().unwrap();

    let view = hub.observer(1).unwrap();
    let player = view.world().local_player().unwrap();
    assert_eq!(view.world().get(player).unwrap().tractor_target(), None);
    assert!(view.adapter(ace).unwrap().tractor().is_queued());

    hub.observer_mut(1)
        .unwrap()
        .request_tractor_target(ace, Some(near))
        .unwrap();
    hub.pump().unwrap();

    let mut seen = Vec::new();
    for _ in 0..6 {
        hub.step().unwrap();
        let view = hub.observer(1).unwrap();
        seen.push(view.world().get(player).unwrap().tractor_target());
    }
    assert!(seen.iter().all(|t| *t != Some(far)));
    assert_eq!(seen.last().copied().flatten(), Some(near));
    assert_eq!(husk(hub.authority(), ace).tractor_target(), Some(near));
}

#[test]
fn tractor_target_that_despawns_is_dropped() {
    let mut hub = LoopbackHub::new(authority(NetworkMode::Server));
    let ace = hub.connect(observer(1), scout_player("ace")).unwrap().unwrap();
    let beacon = hub
        .authority_mut()
        .spawn(SERVER_SESSION, SpawnSpec::npc("Beacon", "beacon", 0, Vec3::X))
        .unwrap();
    hub.run(5).unwrap();

    hub.observer_mut(1)
        .unwrap()
        .request_tractor_target(ace, Some(beacon))
        .unwrap();
    hub.run(2).unwrap();
    assert_eq!(husk(hub.authority(), ace).tractor_target(), Some(beacon));

    hub.authority_mut().despawn(beacon).unwrap();
    hub.run(2).unwrap();

    assert_eq!(husk(hub.authority(), ace).tractor_target(), None);
    let view = hub.observer(1).unwrap();
    let player = view.world().local_player().unwrap();
    assert_eq!(view.world().get(player).unwrap().tractor_target(), None);
}

#[test]
fn late_joiner_catches_up() {
    let mut hub = LoopbackHub::new(authority(NetworkMode::Server));
    let raider = hub
        .authority_mut()
        .spawn(SERVER_SESSION, SpawnSpec::npc("Scout", "raider-1", 1, Vec3::ZERO))
        .unwrap();
    hub.run(3).unwrap();

    let handle = hub.authority().adapter(raider).unwrap().husk().unwrap();
    hub.authority_mut().world_mut().get_mut(handle).unwrap().position = Vec3::new(40.0, 0.0, 0.0);
    hub.authority_mut().force_update(raider).unwrap();
    hub.authority_mut()
        .detach_part(raider, Vec2::new(-2.0, 0.0))
        .unwrap();
    hub.run(2).unwrap();

    hub.connect(observer(7), None).unwrap();
    hub.run(3).unwrap();

    let view = hub.observer(7).unwrap();
    let entity = husk(view, raider);
    assert_eq!(entity.position, Vec3::new(40.0, 0.0, 0.0));
    assert_eq!(entity.network_parts().count(), 1);
    assert!(entity
        .network_parts()
        .all(|p| p.location == Vec2::new(2.0, 0.0)));
}

#[test]
fn abilities_broadcast_cosmetics_and_respect_cooldown() {
    let mut hub = LoopbackHub::new(authority(NetworkMode::Server));
    let ace = hub.connect(observer(1), scout_player("ace")).unwrap().unwrap();
    hub.connect(observer(2), None).unwrap();
    hub.run(5).unwrap();
    for session in [1, 2] {
        hub.observer_mut(session).unwrap().world_mut().drain_cosmetics();
    }

    let victim = Vec3::new(5.0, 5.0, 0.0);
    let view = hub.observer_mut(1).unwrap();
    view.request_ability_activation(ace, Vec2::ZERO, victim).unwrap();
    view.request_ability_activation(ace, Vec2::ZERO, victim).unwrap();
    hub.pump().unwrap();

    assert_eq!(husk(hub.authority(), ace).weapon_timer, 0.5);
    for session in [1, 2] {
        let cosmetics = hub.observer_mut(session).unwrap().world_mut().drain_cosmetics();
        assert_eq!(cosmetics.len(), 1, "session {session}");
        assert_eq!(cosmetics[0].location, Vec2::ZERO);
        assert_eq!(cosmetics[0].target, victim);
    }
}

#[test]
fn direction_requests_move_the_authoritative_craft() {
    let mut hub = LoopbackHub::new(authority(NetworkMode::Server));
    let ace = hub.connect(observer(1), scout_player("ace")).unwrap().unwrap();
    hub.run(5).unwrap();

    hub.observer_mut(1)
        .unwrap()
        .request_direction(ace, Vec3::X)
        .unwrap();
    hub.run(3).unwrap();

    let moved = husk(hub.authority(), ace).position;
    assert!(moved.x > 1.0);

    let view = hub.observer(1).unwrap();
    let player = view.world().local_player().unwrap();
    assert!(view.world().get(player).unwrap().position.x > 0.0);
    assert!(view.world().camera_focus().is_some());
}

#[test]
fn unanswered_identity_requests_are_bounded() {
    let config = SyncConfig {
        retry: RetryPolicy {
            base_delay_ticks: 1,
            max_delay_ticks: 2,
            max_attempts: 3,
        },
        ..SyncConfig::default()
    };
    let mut lonely = Replicator::new(
        Session::new(NetworkMode::Client, 3, 2),
        blueprints(),
        config,
    );
    lonely.receive(
        SERVER_SESSION,
        SyncMessage::Spawn {
            net_id: 1,
            owner: SERVER_SESSION,
            is_player: false,
            position: [0.0; 3],
        },
    );
    for _ in 0..100 {
        lonely.tick();
    }

    let requests = lonely
        .drain_outbox()
        .into_iter()
        .filter(|(route, m)| {
            *route == Route::Authority && matches!(m, SyncMessage::RequestIdentity { .. })
        })
        .count();
    assert_eq!(requests, 3);
    assert_eq!(lonely.adapter(1).unwrap().phase(), Phase::AwaitingBlueprint);

    lonely.request_blueprint_and_identity(1).unwrap();
    assert_eq!(lonely.drain_outbox().len(), 2);
}

#[test]
fn host_player_is_seen_by_clients() {
    let mut hub = LoopbackHub::new(authority(NetworkMode::Host));
    let host_player = hub
        .authority_mut()
        .spawn(SERVER_SESSION, SpawnSpec::player("Scout", "host", Vec3::ZERO))
        .unwrap();
    let guest = hub.connect(observer(1), scout_player("guest")).unwrap().unwrap();
    hub.run(5).unwrap();

    let host = hub.authority();
    assert_eq!(
        host.adapter(host_player).unwrap().husk(),
        host.world().local_player()
    );
    assert_eq!(host.adapter(host_player).unwrap().faction(), 0);
    assert_eq!(host.session().player_count(), 2);

    let view = hub.observer(1).unwrap();
    assert!(view.world().find_by_id("player-0").is_some());
    assert_eq!(
        view.adapter(guest).unwrap().husk(),
        view.world().local_player()
    );
    assert_eq!(
        husk(view, guest).faction,
        hub.authority().adapter(guest).unwrap().faction()
    );
}

#[test]
fn late_older_record_never_replaces_a_newer_one() {
    let mut view = observer(1);
    view.receive(
        SERVER_SESSION,
        SyncMessage::Spawn {
            net_id: 7,
            owner: SERVER_SESSION,
            is_player: false,
            position: [0.0; 3],
        },
    );
    let state = |x: f32, version: u32| {
        let mut record = StateRecord::seed(SERVER_SESSION, 1);
        record.position = Vec3::new(x, 0.0, 0.0);
        SyncMessage::State {
            net_id: 7,
            version,
            record: RecordFrame::from(&record),
            forced: false,
        }
    };

    view.receive(SERVER_SESSION, state(50.0, 2));
    view.receive(SERVER_SESSION, state(10.0, 1));
    assert_eq!(view.adapter(7).unwrap().record().position.x, 50.0);

    view.receive(SERVER_SESSION, state(10.0, 2));
    assert_eq!(view.adapter(7).unwrap().record().position.x, 50.0);

    view.receive(SERVER_SESSION, state(10.0, 3));
    assert_eq!(view.adapter(7).unwrap().record().position.x, 10.0);
}

#[test]
fn rebuilt_parts_return_on_every_observer() {
    let mut hub = LoopbackHub::new(authority(NetworkMode::Server));
    let raider = hub
        .authority_mut()
        .spawn(SERVER_SESSION, SpawnSpec::npc("Scout", "raider-1", 1, Vec3::ZERO))
        .unwrap();
    hub.connect(observer(1), None).unwrap();
    hub.connect(observer(2), None).unwrap();
    hub.run(4).unwrap();

    hub.authority_mut().reset_parts(raider).unwrap();
    hub.step().unwrap();
    for session in [1, 2] {
        assert_eq!(husk(hub.observer(session).unwrap(), raider).network_parts().count(), 0);
    }

    assert!(hub.authority_mut().rebuild_parts(raider).unwrap());
    hub.run(3).unwrap();

    assert_eq!(hub.authority().adapter(raider).unwrap().parts().detached().count(), 0);
    assert_eq!(husk(hub.authority(), raider).network_parts().count(), 2);
    for session in [1, 2] {
        let view = hub.observer(session).unwrap();
        assert_eq!(view.adapter(raider).unwrap().parts().detached().count(), 0);
        assert_eq!(husk(view, raider).network_parts().count(), 2);
    }

    assert!(hub.authority_mut().detach_part(raider, Vec2::new(2.0, 0.0)).unwrap());
    hub.step().unwrap();
    assert_eq!(husk(hub.observer(1).unwrap(), raider).network_parts().count(), 1);
}

#[test]
fn dead_husks_keep_their_last_shape() {
    let mut hub = LoopbackHub::new(authority(NetworkMode::Server));
    let raider = hub
        .authority_mut()
        .spawn(SERVER_SESSION, SpawnSpec::npc("Scout", "raider-1", 1, Vec3::ZERO))
        .unwrap();
    hub.connect(observer(1), None).unwrap();
    hub.connect(observer(2), None).unwrap();
    hub.run(4).unwrap();

    let dead = hub.observer_mut(1).unwrap();
    let handle = dead.adapter(raider).unwrap().husk().unwrap();
    dead.world_mut().get_mut(handle).unwrap().kill();

    let server = hub.authority_mut();
    let handle = server.adapter(raider).unwrap().husk().unwrap();
    server.world_mut().get_mut(handle).unwrap().faction = 0;
    server.force_update(raider).unwrap();
    assert!(server.detach_part(raider, Vec2::new(2.0, 0.0)).unwrap());
    hub.run(2).unwrap();

    let dead = hub.observer(1).unwrap();
    assert_eq!(dead.adapter(raider).unwrap().record().faction, 0);
    let entity = husk(dead, raider);
    assert!(entity.is_dead());
    assert_eq!(entity.faction, 1);
    assert_eq!(entity.network_parts().count(), 2);

    let alive = husk(hub.observer(2).unwrap(), raider);
    assert_eq!(alive.faction, 0);
    assert_eq!(alive.network_parts().count(), 1);
}

#[test]
fn npcs_cannot_shop_even_for_their_owner() {
    let mut hub = LoopbackHub::new(authority(NetworkMode::Host));
    let trader = hub
        .authority_mut()
        .spawn(
            SERVER_SESSION,
            SpawnSpec::npc("Trader", "trader", 0, Vec3::new(5.0, 0.0, 0.0)),
        )
        .unwrap();
    let raider = hub
        .authority_mut()
        .spawn(SERVER_SESSION, SpawnSpec::npc("Scout", "raider-1", 1, Vec3::ZERO))
        .unwrap();
    let host_player = hub
        .authority_mut()
        .spawn(SERVER_SESSION, SpawnSpec::player("Scout", "host", Vec3::ZERO))
        .unwrap();
    hub.run(4).unwrap();

    hub.authority_mut()
        .request_vendor_purchase(raider, 0, trader)
        .unwrap();
    hub.step().unwrap();

    let host = hub.authority();
    let npc = husk(host, raider).craft().unwrap();
    assert_eq!(npc.credits, 100);
    assert!(npc.cargo.is_empty());
    let shellnet::EntityKind::Vendor(stock) = &husk(host, trader).kind else {
        panic!("trader lost its vendor capability");
    };
    assert_eq!(stock.item(0).unwrap().stock, 3);

    hub.authority_mut()
        .request_vendor_purchase(host_player, 0, trader)
        .unwrap();
    hub.step().unwrap();
    assert_eq!(husk(hub.authority(), host_player).craft().unwrap().credits, 40);
}
