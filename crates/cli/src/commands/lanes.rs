// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use anyhow::Context;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};
use ferry_kernel::paych::PayChState;
use ferry_kernel::types::address::Address;
use ferry_node::config::NodeConfig;
use ferry_node::paych::PaychManager;
use ferry_node::rpc::{ChainRpc, HttpRpc};
use std::sync::Arc;

pub async fn run(channel: &str) -> anyhow::Result<()> {
    let config = NodeConfig::load()?;
    let url = config
        .rpc_url
        .clone()
        .context("no chain RPC configured (set FERRY_RPC_URL)")?;
    let rpc: Arc<dyn ChainRpc> = Arc::new(HttpRpc::new(url, config.rpc_token.clone()));
    let manager = PaychManager::new(Some(rpc), None, &config);

    let state = manager
        .load_state_from_actor(&Address::new(channel))
        .await
        .with_context(|| format!("loading channel {channel}"))?;

    println!("\nChannel {}", state.channel);
    println!("--------------------");
    println!("from:      {}", state.from);
    println!("to:        {}", state.to);
    println!("balance:   {}", state.balance);
    println!("redeemed:  {}", state.total_redeemed());
    println!("next lane: {}\n", state.next_lane);
    println!("{}\n", lane_table(&state));
    Ok(())
}

pub fn lane_table(state: &PayChState) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Lane", "Redeemed", "Nonce"]);

    for (lane, ls) in &state.lanes {
        table.add_row(vec![lane.to_string(), ls.redeemed.to_string(), ls.nonce.to_string()]);
    }
    table
}
