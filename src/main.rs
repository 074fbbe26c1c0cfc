//! Demo bootstrap: wires up an in-memory PLC pair, imports a handful of
//! channels, runs them through wiring confirmation and a hard-point sweep,
//! and prints the resulting batch statistics. Stands in for the operator
//! UI/CLI shell, which is out of scope for this crate.

use std::sync::Arc;
use std::time::Duration;

use fat_core::commands::Orchestrator;
use fat_core::config::AppConfig;
use fat_core::domain::{MockPlcGateway, PlcGateway};
use fat_core::models::{ModuleType, RawChannelImport, WireSystem};

fn demo_channel(test_id: u32, module_type: ModuleType) -> RawChannelImport {
    RawChannelImport {
        test_id,
        tag: format!("{module_type}-{test_id:03}"),
        description: "demo channel".into(),
        module_type,
        wire_system: WireSystem::NormallyOpen,
        target_address: format!("target_{test_id}"),
        test_address: format!("test_{test_id}"),
        sll_setpoint_address: None,
        sl_setpoint_address: Some(format!("sl_{test_id}")),
        sh_setpoint_address: Some(format!("sh_{test_id}")),
        shh_setpoint_address: None,
        maintenance_enable_address: None,
        range_low: Some(0.0),
        range_high: Some(100.0),
        lll: None,
        ll: Some(10.0),
        h: Some(90.0),
        hh: None,
        batch_id: "demo-batch".into(),
        test_tag: "DEMO-RUN".into(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load(Some(std::path::Path::new("fat_core.toml")))?;
    fat_core::logging::init(&config.logging_config);

    let test_plc: Arc<dyn PlcGateway> = Arc::new(MockPlcGateway::new("test_plc"));
    let target_plc: Arc<dyn PlcGateway> = Arc::new(MockPlcGateway::new("target_plc"));
    test_plc.connect().await?;
    target_plc.connect().await?;

    let orchestrator = Orchestrator::new(&config, test_plc, target_plc).await?;

    let channels = vec![
        demo_channel(1, ModuleType::AI),
        demo_channel(2, ModuleType::DI),
        demo_channel(3, ModuleType::DO),
    ];
    let batch = orchestrator.import_channels(channels, "demo-batch", vec!["station-1".into()]).await?;
    log::info!("imported batch '{}' with {} channels", batch.name, batch.channel_ids.len());

    orchestrator.confirm_wiring(&batch.name).await?;
    orchestrator.start_test(&batch.name).await?;

    loop {
        let stats = orchestrator.batch_gate.statistics(&batch.name).await?;
        log::info!("{stats:?}");
        if orchestrator.batch_gate.is_batch_complete(&batch.name).await {
            orchestrator.batch_gate.complete_if_done(&batch.name).await?;
            break;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    let records = orchestrator.export_results(&batch.name).await?;
    for record in &records {
        println!("{} [{}] -> {:?}", record.channel.tag, record.channel_id, record.channel.overall_status);
    }

    Ok(())
}
