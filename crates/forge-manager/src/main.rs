use forge_config::ManagerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	forge_config::init_tracing();

	let config = ManagerConfig::from_env()?;

	let state = forge_manager::build_state(&config);
	let app = forge_manager::router(state);

	tracing::info!(name = %config.name, "manager starting");
	let listener = tokio::net::TcpListener::bind(forge_manager::bind_address(&config.name)).await?;
	axum::serve(listener, app).await?;
	Ok(())
}
