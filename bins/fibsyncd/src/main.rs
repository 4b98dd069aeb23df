//! fibsyncd - kernel FIB synchronization daemon.
//!
//! Parses startup configuration, opens the default VRF's command/notify
//! sockets, and runs the single-threaded event loop described in
//! SPEC_FULL.md §5: the notify socket feeds kernel route/FDB
//! notifications through C7/C8 classification into the RIB, and every
//! RIB selection change is synchronized back to the kernel through C6.

use clap::Parser;
use fib_core::config::{Cli, Context};
use fib_core::ingest::{self, Classification, TableLookup};
use fib_core::netlink::connection::{ack_request, create_request, replace_request};
use fib_core::netlink::message::{MessageIter, NlMsgType};
use fib_core::netlink::messages::route::{RouteMessage, RouteRequest, write_route};
use fib_core::netlink::socket::rtnetlink_groups;
use fib_core::rib::SelectionChange;
use fib_core::sync::{self, Action};
use fib_core::vrf::{self, Vrf, VrfRegistry};
use tracing::{error, info, warn};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let ctx = Context::from_cli(&cli).unwrap_or_else(|e| {
        error!("invalid configuration: {e}");
        std::process::exit(1);
    });

    let mut vrfs = VrfRegistry::new().unwrap_or_else(|e| {
        error!("failed to open default VRF sockets: {e}");
        std::process::exit(1);
    });

    if let Err(e) = subscribe_default_notify(&mut vrfs) {
        error!("failed to subscribe notify socket: {e}");
        std::process::exit(1);
    }

    info!(multipath_num = ctx.multipath_num, allow_delete = ctx.allow_delete, "fibsyncd started");

    run_event_loop(&ctx, &mut vrfs).await;
    Ok(())
}

fn subscribe_default_notify(vrfs: &mut VrfRegistry) -> fib_core::Result<()> {
    let vrf = vrfs.default_vrf_mut();
    vrf.sockets.notify.subscribe(rtnetlink_groups::RTNLGRP_IPV4_ROUTE)?;
    vrf.sockets.notify.subscribe(rtnetlink_groups::RTNLGRP_IPV6_ROUTE)?;
    vrf.sockets.notify.subscribe(rtnetlink_groups::RTNLGRP_NEIGH)?;
    vrf.sockets.notify.subscribe(rtnetlink_groups::RTNLGRP_IPV4_MROUTE)?;
    vrf.sockets.notify.subscribe(rtnetlink_groups::RTNLGRP_IPV6_MROUTE)?;
    Ok(())
}

/// Resolves table ids to a VRF by combining the VRF registry's
/// registered-table lookup with the configured import-range admission
/// (base spec §6 `is_zebra_valid_kernel_table`): a table outside any
/// VRF's registered id but inside a configured import range is treated
/// as belonging to the default VRF.
struct TableResolver<'a> {
    vrfs: &'a VrfRegistry,
    ctx: &'a Context,
}

impl TableLookup for TableResolver<'_> {
    fn resolve_table(&self, table: u32) -> Option<u32> {
        self.vrfs
            .resolve_table(table)
            .or_else(|| self.ctx.is_valid_kernel_table(table).then_some(vrf::DEFAULT_VRF_ID))
    }
}

/// Single-threaded cooperative event loop: the only suspension points are
/// the notify-socket read and the command-socket talk calls issued while
/// synchronizing a selection change.
async fn run_event_loop(ctx: &Context, vrfs: &mut VrfRegistry) {
    loop {
        let data = match vrfs.default_vrf().sockets.notify.recv_event().await {
            Ok(data) => data,
            Err(e) => {
                warn!("notify socket read failed: {e}");
                continue;
            }
        };

        let messages: Vec<(u16, Vec<u8>)> = MessageIter::new(&data)
            .filter_map(|result| match result {
                Ok((header, payload)) => Some((header.nlmsg_type, payload.to_vec())),
                Err(e) => {
                    warn!("malformed notify message, dropping: {e}");
                    None
                }
            })
            .collect();

        for (msg_type, payload) in messages {
            if matches!(msg_type, NlMsgType::RTM_NEWROUTE | NlMsgType::RTM_DELROUTE) {
                handle_route_event(ctx, vrfs, msg_type, &payload).await;
            }
        }
    }
}

async fn handle_route_event(ctx: &Context, vrfs: &mut VrfRegistry, msg_type: u16, payload: &[u8]) {
    let msg = match RouteMessage::parse(payload) {
        Ok(msg) => msg,
        Err(e) => {
            warn!("malformed route notification, dropping: {e}");
            return;
        }
    };

    let resolver = TableResolver { vrfs: &*vrfs, ctx };
    let classification = ingest::classify(&msg, msg_type, &resolver);

    match classification {
        Classification::Ignored | Classification::SelfAuthoredAdd => {}
        Classification::Upsert { vrf_id, prefix, entry } => {
            let Some(vrf) = vrfs.get_mut(vrf_id) else { return };
            let change = vrf.rib.trie_for_mut(&prefix).add_multipath(prefix, entry);
            info!(?prefix, vrf_id, "kernel route ingested");
            synchronize(ctx, vrf, prefix, change).await;
        }
        Classification::Delete { vrf_id, prefix, origin, instance } => {
            let Some(vrf) = vrfs.get_mut(vrf_id) else { return };
            let change = vrf.rib.trie_for_mut(&prefix).delete(prefix, origin, instance);
            synchronize(ctx, vrf, prefix, change).await;
        }
    }
}

async fn synchronize(ctx: &Context, vrf: &mut Vrf, prefix: fib_core::address::Prefix, change: SelectionChange) {
    if change.old.is_none() && change.new.is_none() {
        return;
    }

    let Some((action, request)) =
        sync::install(&prefix, change.old.as_ref(), change.new.as_ref(), ctx.multipath_num)
    else {
        return;
    };

    if action == Action::Del && !ctx.allow_delete {
        return;
    }

    if let Err(e) = submit(vrf, action, &request).await {
        error!(?prefix, ?action, "failed to synchronize route with kernel: {e}");
    }
}

async fn submit(vrf: &Vrf, action: Action, request: &RouteRequest) -> fib_core::Result<()> {
    let mut builder = match action {
        Action::Add => create_request(NlMsgType::RTM_NEWROUTE),
        Action::Replace => replace_request(NlMsgType::RTM_NEWROUTE),
        Action::Del => ack_request(NlMsgType::RTM_DELROUTE),
    };
    write_route(&mut builder, request);
    vrf.sockets.command.talk_ack(builder).await
}
