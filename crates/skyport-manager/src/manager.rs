//! Tunnel lifecycle
//!
//! A [`TunnelManager`] owns exactly one remote endpoint for the life of a
//! tunnel. `up()` provisions and boots it, establishes the link and starts
//! the relay workers; `monitor_until()` keeps the link alive; `cleanup()`
//! tears everything down again, whatever state the tunnel ended up in.

use crate::collaborators::{Collaborators, ShellFactory};
use crate::error::ManagerError;
use crate::link::{link_for, LinkContext, LinkHealth, TunnelLink};
use crate::options::ManagerOptions;
use crate::retry::RetryPolicy;
use skyport_link::{BootDocument, Templater};
use skyport_proto::{
    format_ports, ComputeProvisioner, EndpointStatus, KeyKind, KeypairGenerator, RemoteEndpoint,
    ServicePort, TunnelState,
};
use skyport_relay::{RelayError, RelayHandle, RelayProxy};
use skyport_remote::{wait_for_port, RemoteExec, StateDir};
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Remote command that blocks until first-boot configuration has finished
const BOOT_COMPLETE_COMMAND: [&str; 3] = ["cloud-init", "status", "--wait"];

pub struct TunnelManager {
    options: ManagerOptions,
    provisioner: Arc<dyn ComputeProvisioner>,
    keygen: Arc<dyn KeypairGenerator>,
    templater: Arc<dyn Templater>,
    shells: Arc<dyn ShellFactory>,
    link: Box<dyn TunnelLink>,
    state: TunnelState,
    state_dir: StateDir,
    /// Only a directory this manager populated is removed on cleanup
    owns_state_dir: bool,
    /// Id of a created host that has not reported ready yet
    pending_host: Option<String>,
    endpoint: Option<RemoteEndpoint>,
    shell: Option<Arc<dyn RemoteExec>>,
    relay: Option<RelayHandle>,
}

impl TunnelManager {
    /// Validate the options. Nothing is provisioned until [`Self::up`].
    pub fn new(options: ManagerOptions, collaborators: Collaborators) -> Result<Self, ManagerError> {
        options.validate()?;

        let state_dir = match &options.state_base_dir {
            Some(base) => StateDir::with_base_dir(base, &options.name),
            None => StateDir::for_tunnel(&options.name)?,
        };
        let link = collaborators
            .link
            .unwrap_or_else(|| link_for(&options));

        debug!(
            tunnel = %options.name,
            link = link.kind(),
            ports = %format_ports(&options.services),
            "Tunnel manager initialized"
        );

        Ok(Self {
            options,
            provisioner: collaborators.provisioner,
            keygen: collaborators.keygen,
            templater: collaborators.templater,
            shells: collaborators.shells,
            link,
            state: TunnelState::Unprovisioned,
            state_dir,
            owns_state_dir: false,
            pending_host: None,
            endpoint: None,
            shell: None,
            relay: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.options.name
    }

    pub fn state(&self) -> TunnelState {
        self.state
    }

    pub fn endpoint(&self) -> Option<&RemoteEndpoint> {
        self.endpoint.as_ref()
    }

    /// Local address the relay workers listen on, if the link uses relays
    pub fn relay_address(&self) -> Option<IpAddr> {
        self.link.relay_address()
    }

    pub fn services(&self) -> &[ServicePort] {
        &self.options.services
    }

    /// Relay ports that could not be bound
    pub fn relay_failures(&self) -> &[RelayError] {
        self.relay.as_ref().map(|r| r.failures()).unwrap_or(&[])
    }

    pub fn state_dir(&self) -> &StateDir {
        &self.state_dir
    }

    fn set_state(&mut self, to: TunnelState) -> Result<(), ManagerError> {
        let from = self.state;
        self.state = from.transition(to)?;
        debug!(tunnel = %self.options.name, "Tunnel state {} -> {}", from, to);
        Ok(())
    }

    fn fail(&mut self) {
        if let Ok(next) = self.state.transition(TunnelState::Failed) {
            self.state = next;
        }
    }

    /// Provision, boot and connect the remote endpoint.
    ///
    /// On error the tunnel is left in `Failed` with whatever resources were
    /// created so far; the caller is expected to run [`Self::cleanup`].
    pub async fn up(&mut self) -> Result<(), ManagerError> {
        if self.state != TunnelState::Unprovisioned {
            return Err(ManagerError::InvalidState {
                operation: "bring the tunnel up".to_string(),
                state: self.state,
            });
        }

        match self.bring_up().await {
            Ok(()) => Ok(()),
            Err(e) => {
                error!(tunnel = %self.options.name, state = %self.state, "Tunnel setup failed: {}", e);
                self.fail();
                Err(e)
            }
        }
    }

    async fn bring_up(&mut self) -> Result<(), ManagerError> {
        let name = self.options.name.clone();
        self.set_state(TunnelState::Provisioning)?;

        self.state_dir.clean()?;
        self.state_dir.create()?;
        self.owns_state_dir = true;

        match self.provisioner.list_by_name(&name).await {
            Ok(existing) if !existing.is_empty() => {
                warn!(tunnel = %name, ids = ?existing, "Hosts with this tunnel name already exist");
            }
            Ok(_) => {}
            Err(e) => debug!("Could not list existing hosts: {}", e),
        }

        info!(tunnel = %name, link = self.link.kind(), "Generating keys");
        let host_key = self
            .keygen
            .generate(KeyKind::HostKey, &format!("{}-host", name))
            .await?;
        let client_key = self
            .keygen
            .generate(KeyKind::ClientKey, &format!("{}-client", name))
            .await?;

        let ctx = LinkContext {
            name: &name,
            services: &self.options.services,
            destination: self.options.destination,
            keygen: self.keygen.as_ref(),
            state_dir: &self.state_dir,
        };
        let additions = self.link.prepare(&ctx).await?;

        let mut document = BootDocument::from_templater(self.templater.as_ref())?
            .with_host_key(&host_key)
            .with_authorized_key(&client_key.public);
        for file in &additions.files {
            document = document.with_file(&file.path, &file.content, &file.permissions);
        }
        for command in &additions.commands {
            document = document.with_command(command);
        }
        let boot_document = document.render()?;

        self.state_dir.write_client_key(&client_key)?;

        info!(tunnel = %name, "Creating remote endpoint");
        let id = self
            .provisioner
            .create(&name, &client_key.public, &self.options.services, &boot_document)
            .await?;
        self.pending_host = Some(id.clone());

        let host = self.provisioner.wait_until_ready(&id).await?;
        let mut endpoint = RemoteEndpoint::new(&name, host);
        self.endpoint = Some(endpoint.clone());
        self.pending_host = None;
        self.set_state(TunnelState::Booting)?;

        let address = IpAddr::V4(endpoint.address);
        self.state_dir.write_endpoint(&endpoint)?;
        self.state_dir
            .write_known_hosts(&[address], self.options.management_port, &host_key.public)?;

        info!(id = %endpoint.id, address = %address, "Waiting for remote endpoint to boot");
        wait_for_port(
            SocketAddr::new(address, self.options.management_port),
            self.options.boot_poll_interval,
        )
        .await;

        let shell = self
            .shells
            .connect(&self.state_dir, address, self.options.management_port);
        shell
            .run_quiet(&BOOT_COMPLETE_COMMAND)
            .await
            .map_err(|e| ManagerError::Provisioning(format!("boot did not complete: {}", e)))?;

        if let Some(floating) = self.options.floating_address {
            info!(address = %floating, "Attaching floating address");
            self.provisioner
                .attach_floating_address(floating, &endpoint.id)
                .await?;
            endpoint.floating_address = Some(floating);
            self.state_dir
                .write_known_hosts(
                    &[address, IpAddr::V4(floating)],
                    self.options.management_port,
                    &host_key.public,
                )?;
        }

        endpoint.status = EndpointStatus::Ready;
        self.state_dir.write_endpoint(&endpoint)?;
        self.endpoint = Some(endpoint.clone());
        self.shell = Some(shell.clone());

        self.set_state(TunnelState::Establishing)?;
        self.link.establish(&endpoint, shell).await?;
        self.test_tunnel()
            .await
            .map_err(|e| ManagerError::TunnelEstablish(format!("initial probe failed: {}", e)))?;

        self.start_relays().await;
        self.set_state(TunnelState::Monitoring)?;

        info!(
            tunnel = %name,
            address = %endpoint.public_address(),
            ports = %format_ports(&self.options.services),
            "Tunnel is up"
        );
        Ok(())
    }

    async fn start_relays(&mut self) {
        let listen = match self.link.relay_address() {
            Some(listen) => listen,
            None => {
                debug!("Link forwards directly, no relay workers needed");
                return;
            }
        };

        let handle = RelayProxy::new(listen, self.options.destination, &self.options.services)
            .with_mode(self.options.session_mode)
            .spawn()
            .await;
        if !handle.failures().is_empty() {
            warn!(
                failed = handle.failures().len(),
                running = handle.workers().len(),
                "Some relay ports could not be started"
            );
        }
        self.relay = Some(handle);
    }

    /// Re-open the link's carrier. Only valid once the link exists.
    pub async fn open_tunnel(&mut self) -> Result<(), ManagerError> {
        if !self.state.has_link() {
            return Err(ManagerError::InvalidState {
                operation: "open the tunnel".to_string(),
                state: self.state,
            });
        }
        self.link.open().await
    }

    /// A single liveness probe
    pub async fn test_tunnel(&mut self) -> Result<(), ManagerError> {
        if !self.state.has_link() {
            return Err(ManagerError::InvalidState {
                operation: "test the tunnel".to_string(),
                state: self.state,
            });
        }
        match self.link.probe().await {
            LinkHealth::Healthy => Ok(()),
            LinkHealth::Unresponsive(reason) | LinkHealth::Exited(reason) => {
                Err(ManagerError::HeartbeatFailure {
                    failures: 1,
                    reason,
                })
            }
        }
    }

    /// Monitor with the heartbeat budget from the options until it is
    /// exhausted or Ctrl+C is pressed
    pub async fn monitor(&mut self) -> Result<(), ManagerError> {
        let policy = self.options.heartbeat;
        self.monitor_until(policy, ctrl_c()).await
    }

    /// Monitor until the budget is exhausted or Ctrl+C is pressed
    pub async fn monitor_tunnel(
        &mut self,
        interval: Duration,
        retries: u32,
    ) -> Result<(), ManagerError> {
        self.monitor_until(RetryPolicy::heartbeat(interval, retries), ctrl_c())
            .await
    }

    /// Heartbeat loop.
    ///
    /// Returns `Ok(())` after `shutdown` resolves and cleanup has run, or
    /// `HeartbeatFailure` once `policy` is exhausted. Link exits are handled
    /// by re-opening the link under the options' respawn policy.
    pub async fn monitor_until<F>(
        &mut self,
        policy: RetryPolicy,
        shutdown: F,
    ) -> Result<(), ManagerError>
    where
        F: Future<Output = ()>,
    {
        if !matches!(self.state, TunnelState::Monitoring | TunnelState::Degraded) {
            return Err(ManagerError::InvalidState {
                operation: "monitor the tunnel".to_string(),
                state: self.state,
            });
        }

        tokio::pin!(shutdown);
        let respawn = self.options.respawn;
        let mut failures = 0u32;
        let mut respawns = 0u32;
        let mut wait = policy.interval;

        loop {
            if unless_shutdown(&mut shutdown, tokio::time::sleep(wait))
                .await
                .is_none()
            {
                return self.shutdown_requested().await;
            }

            let health = match unless_shutdown(&mut shutdown, self.link.probe()).await {
                Some(health) => health,
                None => return self.shutdown_requested().await,
            };

            match health {
                LinkHealth::Healthy => {
                    if self.state == TunnelState::Degraded {
                        info!(tunnel = %self.options.name, "Tunnel recovered");
                        self.set_state(TunnelState::Monitoring)?;
                    }
                    failures = 0;
                    respawns = 0;
                    wait = policy.interval;
                }
                LinkHealth::Unresponsive(reason) => {
                    failures += 1;
                    warn!(failures, "Heartbeat failed: {}", reason);
                    if self.state == TunnelState::Monitoring {
                        self.set_state(TunnelState::Degraded)?;
                    }
                    if policy.is_exhausted(failures) {
                        error!(failures, "Heartbeat budget exhausted");
                        self.fail();
                        return Err(ManagerError::HeartbeatFailure { failures, reason });
                    }
                    wait = policy.backoff(failures);
                }
                LinkHealth::Exited(reason) => {
                    respawns += 1;
                    if self.state == TunnelState::Monitoring {
                        self.set_state(TunnelState::Degraded)?;
                    }
                    if respawn.is_exhausted(respawns) {
                        error!(respawns, "Link respawn budget exhausted");
                        self.fail();
                        return Err(ManagerError::HeartbeatFailure {
                            failures: respawns,
                            reason,
                        });
                    }

                    let delay = respawn.backoff(respawns);
                    warn!(attempt = respawns, delay = ?delay, "Link exited ({}), re-opening", reason);
                    if unless_shutdown(&mut shutdown, tokio::time::sleep(delay))
                        .await
                        .is_none()
                    {
                        return self.shutdown_requested().await;
                    }

                    self.set_state(TunnelState::Establishing)?;
                    match unless_shutdown(&mut shutdown, self.link.open()).await {
                        None => return self.shutdown_requested().await,
                        Some(Ok(())) => {
                            info!(attempt = respawns, "Link re-opened");
                            self.set_state(TunnelState::Monitoring)?;
                        }
                        Some(Err(e)) => {
                            warn!(attempt = respawns, "Failed to re-open link: {}", e);
                            self.set_state(TunnelState::Degraded)?;
                        }
                    }
                    wait = policy.interval;
                }
            }
        }
    }

    async fn shutdown_requested(&mut self) -> Result<(), ManagerError> {
        info!(tunnel = %self.options.name, "Shutdown requested");
        self.cleanup().await
    }

    /// Tear down everything this manager created. Safe to call from any
    /// state and more than once; only the first call does any work.
    ///
    /// A destroy failure is returned but not retried.
    pub async fn cleanup(&mut self) -> Result<(), ManagerError> {
        if self.state == TunnelState::TornDown {
            debug!(tunnel = %self.options.name, "Tunnel already torn down");
            return Ok(());
        }
        info!(tunnel = %self.options.name, state = %self.state, "Cleaning up tunnel");

        if let Some(mut relay) = self.relay.take() {
            relay.shutdown();
        }
        if let Err(e) = self.link.teardown().await {
            debug!("Link teardown: {}", e);
        }
        self.shell = None;

        let mut result = Ok(());
        if let Some(endpoint) = self.endpoint.as_mut() {
            if !endpoint.is_destroyed() {
                match self.provisioner.destroy(&endpoint.id).await {
                    Ok(()) => {
                        endpoint.status = EndpointStatus::Destroyed;
                        info!(id = %endpoint.id, "Remote endpoint destroyed");
                    }
                    Err(e) => {
                        error!(id = %endpoint.id, "Failed to destroy remote endpoint: {}", e);
                        result = Err(ManagerError::Provisioning(format!(
                            "failed to destroy endpoint {}: {}",
                            endpoint.id, e
                        )));
                    }
                }
            }
        } else if let Some(id) = self.pending_host.take() {
            match self.provisioner.destroy(&id).await {
                Ok(()) => info!(id = %id, "Unfinished remote endpoint destroyed"),
                Err(e) => {
                    error!(id = %id, "Failed to destroy remote endpoint: {}", e);
                    result = Err(ManagerError::Provisioning(format!(
                        "failed to destroy endpoint {}: {}",
                        id, e
                    )));
                }
            }
        }

        if self.owns_state_dir {
            match self.state_dir.clean() {
                Ok(()) => self.owns_state_dir = false,
                Err(e) => warn!("Failed to remove state directory: {}", e),
            }
        }

        self.state = TunnelState::TornDown;
        result
    }

    fn shell(&self, operation: &str) -> Result<Arc<dyn RemoteExec>, ManagerError> {
        self.shell.clone().ok_or_else(|| ManagerError::InvalidState {
            operation: operation.to_string(),
            state: self.state,
        })
    }

    /// Run a command on the endpoint and return its stdout
    pub async fn run(&self, command: &[&str]) -> Result<String, ManagerError> {
        let shell = self.shell("run a remote command")?;
        Ok(shell.run(command).await?)
    }

    /// Run a command on the endpoint, discarding its output
    pub async fn run_quiet(&self, command: &[&str]) -> Result<(), ManagerError> {
        let shell = self.shell("run a remote command")?;
        Ok(shell.run_quiet(command).await?)
    }
}

/// Resolves on Ctrl+C; never, if the signal cannot be listened for
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Drive `fut` to completion unless `shutdown` resolves first
async fn unless_shutdown<S, F>(shutdown: &mut Pin<&mut S>, fut: F) -> Option<F::Output>
where
    S: Future<Output = ()>,
    F: Future,
{
    tokio::select! {
        _ = shutdown.as_mut() => None,
        output = fut => Some(output),
    }
}
