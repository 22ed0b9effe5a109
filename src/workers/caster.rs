use log::info;
use std::sync::Arc;
use tokio::sync::watch;

use crate::capture::ScreenCapture;
use crate::error::SessionError;
use crate::pipeline::SessionStatus;
use crate::pipeline::sender::{SessionController, SessionOptions};
use crate::settings::{MirroringSettings, SettingsStore};
use crate::utils::SystemInfo;

/// What the home screen shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HomeState {
    pub is_connected: bool,
    pub is_mirroring: bool,
    pub device_ip: String,
    /// Port held while mirroring, otherwise the configured one
    pub current_port: u16,
}

impl HomeState {
    pub fn derive(status: &SessionStatus, info: &SystemInfo, settings: &MirroringSettings) -> Self {
        let is_mirroring = status.is_mirroring();
        Self {
            is_connected: info.is_connected(),
            is_mirroring,
            device_ip: info.device_ip.clone(),
            current_port: match (is_mirroring, status.port) {
                (true, Some(port)) => port,
                _ => settings.port,
            },
        }
    }
}

/// Screen caster: the mirroring session plus the data shown around it.
///
/// Built explicitly and handed to whoever needs it; clones share the session.
#[derive(Clone)]
pub struct Caster {
    controller: SessionController,
    capture: Arc<dyn ScreenCapture>,
    settings: Arc<SettingsStore>,
}

impl Caster {
    pub fn new(
        capture: Arc<dyn ScreenCapture>,
        settings: Arc<SettingsStore>,
        options: SessionOptions,
    ) -> Self {
        Self {
            controller: SessionController::new(
                Arc::clone(&capture),
                Arc::clone(&settings),
                options,
            ),
            capture,
            settings,
        }
    }

    pub async fn start_mirroring(&self) -> Result<(), SessionError> {
        let port = self.controller.start().await?;
        if let Some(ip) = crate::utils::net::device_ip() {
            info!("Connect a receiver to {}:{}", ip, port);
        }
        Ok(())
    }

    pub async fn stop_mirroring(&self) -> Result<(), SessionError> {
        self.controller.stop().await
    }

    pub fn is_currently_mirroring(&self) -> bool {
        self.controller.is_active()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.controller.subscribe()
    }

    pub fn controller(&self) -> &SessionController {
        &self.controller
    }

    /// Settings the next session will start with.
    pub async fn settings(&self) -> MirroringSettings {
        self.settings.load_settings().await
    }

    pub fn settings_store(&self) -> &Arc<SettingsStore> {
        &self.settings
    }

    pub fn system_info(&self) -> SystemInfo {
        SystemInfo::collect(self.capture.display())
    }

    pub async fn home_state(&self) -> HomeState {
        let settings = self.settings().await;
        HomeState::derive(&self.controller.status(), &self.system_info(), &settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{ConsentGate, GenericDisplay, GenericScreenCapture};
    use crate::settings::Resolution;
    use std::net::{IpAddr, Ipv4Addr};

    async fn caster() -> Caster {
        let capture = Arc::new(GenericScreenCapture::new(
            GenericDisplay::new("Test", 854, 480, 60),
            Arc::new(ConsentGate::granted()),
        ));
        let settings = Arc::new(SettingsStore::in_memory());
        settings.update_resolution(Resolution::Sd).await.unwrap();
        settings.update_port(0).await.unwrap();

        Caster::new(
            capture,
            settings,
            SessionOptions {
                bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
                ..SessionOptions::default()
            },
        )
    }

    #[test]
    fn test_home_state_prefers_the_bound_port() {
        let info = SystemInfo {
            device_ip: "192.168.1.20".to_string(),
            wifi_network: "wlan0".to_string(),
            screen_resolution: "1920x1080".to_string(),
            os_version: "Linux".to_string(),
        };
        let settings = MirroringSettings::default();

        let idle = HomeState::derive(&SessionStatus::idle(), &info, &settings);
        assert!(idle.is_connected);
        assert!(!idle.is_mirroring);
        assert_eq!(idle.current_port, 8080);

        let active = SessionStatus {
            phase: crate::pipeline::SessionPhase::Active {
                started_at: std::time::Instant::now(),
            },
            port: Some(40_123),
            ..SessionStatus::idle()
        };
        let mirroring = HomeState::derive(&active, &info, &settings);
        assert!(mirroring.is_mirroring);
        assert_eq!(mirroring.current_port, 40_123);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_start_stop_are_repeatable() {
        let caster = caster().await;

        for _ in 0..2 {
            caster.start_mirroring().await.unwrap();
            assert!(caster.is_currently_mirroring());
            let home = caster.home_state().await;
            assert!(home.is_mirroring);
            assert_ne!(home.current_port, 0);

            caster.stop_mirroring().await.unwrap();
            caster.stop_mirroring().await.unwrap();
            assert!(!caster.is_currently_mirroring());
        }
    }

    #[tokio::test]
    async fn test_system_info_uses_capture_display() {
        let caster = caster().await;
        assert_eq!(caster.system_info().screen_resolution, "854x480");
        assert_eq!(caster.settings().await.resolution, Resolution::Sd);

        caster.settings_store().update_fps(24).await.unwrap();
        assert_eq!(caster.settings().await.fps, 24);
    }
}
