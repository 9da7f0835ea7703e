// Command dispatch: turns CLI verbs into device writes and keeps the
// in-memory state in step with what was sent.

use std::str::FromStr;

use tracing::info;

use crate::config::{CONTRAST_LIMIT, Config};
use crate::display::ScreenDump;
use crate::error::DeqError;
use crate::midi::{DeviceSession, Transport};
use crate::protocol::{Screen, lookup};
use crate::state::State;

const ROTATE: &str = "rotate";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScreenTarget {
    Select(Screen),
    Rotate,
}

impl FromStr for ScreenTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            ROTATE => Ok(ScreenTarget::Rotate),
            "rta" => Ok(ScreenTarget::Select(Screen::Rta)),
            "peak" => Ok(ScreenTarget::Select(Screen::Peak)),
            "vu" => Ok(ScreenTarget::Select(Screen::Vu)),
            other => Err(format!("unknown screen '{}' (use: rta, vu, peak, rotate)", other)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContrastTarget {
    Level(u8),
    Rotate,
}

impl FromStr for ContrastTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == ROTATE {
            return Ok(ContrastTarget::Rotate);
        }
        s.parse::<u8>()
            .map(ContrastTarget::Level)
            .map_err(|_| format!("expected 0-{} or 'rotate', got '{}'", CONTRAST_LIMIT, s))
    }
}

/// Screen after `current` in the rotation. With no known current screen the
/// rotation starts from `fallback`.
pub fn next_screen(current: Option<Screen>, fallback: Screen) -> Screen {
    current.unwrap_or(fallback).next()
}

/// `[min, mid, max]` stops of the contrast rotation.
pub fn contrast_levels(min: u8, max: u8) -> [u8; 3] {
    let mid = ((min as u16 + max as u16) / 2) as u8;
    [min, mid, max]
}

/// Snap `current` to the closest stop (earliest stop on a tie) and step to
/// the next one, wrapping from max back to min.
pub fn next_contrast(current: u8, min: u8, max: u8) -> u8 {
    let levels = contrast_levels(min, max);
    let closest = levels
        .iter()
        .enumerate()
        .min_by_key(|(_, level)| (**level as i16 - current as i16).abs())
        .map(|(idx, _)| idx)
        .unwrap_or(0);
    levels[(closest + 1) % levels.len()]
}

pub struct Dispatcher<'a, T> {
    session: &'a mut DeviceSession<T>,
    config: &'a Config,
    state: &'a mut State,
}

impl<'a, T: Transport> Dispatcher<'a, T> {
    pub fn new(session: &'a mut DeviceSession<T>, config: &'a Config, state: &'a mut State) -> Self {
        Dispatcher {
            session,
            config,
            state,
        }
    }

    pub async fn screen(&mut self, target: ScreenTarget) -> Result<Screen, DeqError> {
        let screen = match target {
            ScreenTarget::Select(screen) => screen,
            ScreenTarget::Rotate => next_screen(self.state.screen, self.config.default.screen),
        };
        self.apply_screen(screen).await?;
        Ok(screen)
    }

    async fn apply_screen(&mut self, screen: Screen) -> Result<(), DeqError> {
        info!("Switching to {} screen", screen);
        for name in screen.parameter_sequence() {
            let entry = lookup(name)?;
            self.session.write_parameter(&entry).await?;
        }
        self.state.screen = Some(screen);
        Ok(())
    }

    pub async fn contrast(&mut self, target: ContrastTarget) -> Result<u8, DeqError> {
        let level = match target {
            ContrastTarget::Level(level) => level,
            ContrastTarget::Rotate => {
                let current = self.state.contrast.unwrap_or(self.config.default.contrast);
                next_contrast(current, self.config.contrast_min, self.config.contrast_max)
            }
        };
        self.apply_contrast(level).await?;
        Ok(level)
    }

    async fn apply_contrast(&mut self, level: u8) -> Result<(), DeqError> {
        if level > CONTRAST_LIMIT {
            return Err(DeqError::InvalidContrast {
                value: level,
                min: 0,
                max: CONTRAST_LIMIT,
            });
        }

        info!("Setting contrast to {}", level);
        let entry = lookup("contrast")?.with_value(level as u16)?;
        self.session.write_parameter(&entry).await?;
        self.state.contrast = Some(level);
        Ok(())
    }

    /// Apply the configured default screen, then the default contrast.
    pub async fn restore(&mut self) -> Result<(Screen, u8), DeqError> {
        let (screen, contrast) = (self.config.default.screen, self.config.default.contrast);
        let screen = self.screen(ScreenTarget::Select(screen)).await?;
        let contrast = self.contrast(ContrastTarget::Level(contrast)).await?;
        Ok((screen, contrast))
    }

    /// Ask the unit who it is and record the answer in the state.
    pub async fn query_identity(&mut self) -> Result<String, DeqError> {
        let identity = self.session.identify().await?;
        self.state.identity_device = Some(identity.clone());
        Ok(identity)
    }

    pub async fn dump_screen(&mut self) -> Result<ScreenDump, DeqError> {
        self.session.dump_screen().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::tests::session;
    use crate::protocol::{CMD_IDENTIFY_REPLY, SysExCodec, decode_write_value};

    fn config(min: u8, max: u8) -> Config {
        Config {
            midi_device: "UM-ONE".into(),
            contrast_min: min,
            contrast_max: max,
            ..Config::default()
        }
    }

    #[test]
    fn parses_targets() {
        assert_eq!("rotate".parse::<ScreenTarget>(), Ok(ScreenTarget::Rotate));
        assert_eq!("vu".parse::<ScreenTarget>(), Ok(ScreenTarget::Select(Screen::Vu)));
        assert!("eq".parse::<ScreenTarget>().is_err());
        assert_eq!("12".parse::<ContrastTarget>(), Ok(ContrastTarget::Level(12)));
        assert_eq!("rotate".parse::<ContrastTarget>(), Ok(ContrastTarget::Rotate));
        assert!("bright".parse::<ContrastTarget>().is_err());
    }

    #[test]
    fn contrast_rotation_stops() {
        assert_eq!(contrast_levels(0, 15), [0, 7, 15]);
        assert_eq!(contrast_levels(3, 9), [3, 6, 9]);

        assert_eq!(next_contrast(15, 0, 15), 0);
        assert_eq!(next_contrast(0, 0, 15), 7);
        assert_eq!(next_contrast(7, 0, 15), 15);
        assert_eq!(next_contrast(12, 0, 15), 0);
        assert_eq!(next_contrast(4, 3, 9), 6);
    }

    #[test]
    fn contrast_tie_goes_to_lower_stop() {
        // 1 is equally far from 0 and 2
        assert_eq!(next_contrast(1, 0, 4), 2);
    }

    #[tokio::test]
    async fn screen_rotation_cycles() {
        let config = config(0, 15);
        let mut state = State {
            screen: Some(Screen::Rta),
            ..Default::default()
        };
        let mut s = session(vec![]);
        let mut d = Dispatcher::new(&mut s, &config, &mut state);

        assert_eq!(d.screen(ScreenTarget::Rotate).await.unwrap(), Screen::Peak);
        assert_eq!(d.screen(ScreenTarget::Rotate).await.unwrap(), Screen::Vu);
        assert_eq!(d.screen(ScreenTarget::Rotate).await.unwrap(), Screen::Rta);
        assert_eq!(state.screen, Some(Screen::Rta));
        // 2 + 2 + 7 writes
        assert_eq!(s.transport().sent.len(), 11);
    }

    #[tokio::test]
    async fn rotation_without_state_starts_from_default() {
        let config = config(0, 15);
        let mut state = State::default();
        let mut s = session(vec![]);
        let mut d = Dispatcher::new(&mut s, &config, &mut state);
        assert_eq!(d.screen(ScreenTarget::Rotate).await.unwrap(), Screen::Peak);
    }

    #[tokio::test]
    async fn rta_screen_writes_in_order() {
        let config = config(0, 15);
        let mut state = State::default();
        let mut s = session(vec![]);
        Dispatcher::new(&mut s, &config, &mut state)
            .screen(ScreenTarget::Select(Screen::Rta))
            .await
            .unwrap();

        let expected: Vec<Vec<u8>> = Screen::Rta
            .parameter_sequence()
            .iter()
            .map(|name| SysExCodec::default().encode_write_value(&lookup(name).unwrap()))
            .collect();
        assert_eq!(s.transport().sent, expected);
        assert_eq!(state.screen, Some(Screen::Rta));
    }

    #[tokio::test]
    async fn contrast_rotate_wraps_to_min() {
        let config = config(0, 15);
        let mut state = State {
            contrast: Some(15),
            ..Default::default()
        };
        let mut s = session(vec![]);
        let level = Dispatcher::new(&mut s, &config, &mut state)
            .contrast(ContrastTarget::Rotate)
            .await
            .unwrap();

        assert_eq!(level, 0);
        assert_eq!(state.contrast, Some(0));
        let entry = decode_write_value(&s.transport().sent[0]).unwrap();
        assert_eq!((entry.module(), entry.offset(), entry.value()), (8, 1, 0));
    }

    #[tokio::test]
    async fn contrast_out_of_range_sends_nothing() {
        let config = config(0, 15);
        let mut state = State::default();
        let mut s = session(vec![]);
        let result = Dispatcher::new(&mut s, &config, &mut state)
            .contrast(ContrastTarget::Level(16))
            .await;

        assert!(matches!(result, Err(DeqError::InvalidContrast { value: 16, .. })));
        assert!(s.transport().sent.is_empty());
        assert_eq!(state.contrast, None);
    }

    #[tokio::test]
    async fn restore_applies_screen_then_contrast() {
        let mut config = config(3, 9);
        config.default.screen = Screen::Vu;
        config.default.contrast = 5;
        let mut state = State::default();
        let mut s = session(vec![]);
        let restored = Dispatcher::new(&mut s, &config, &mut state)
            .restore()
            .await
            .unwrap();

        assert_eq!(restored, (Screen::Vu, 5));
        let sent = &s.transport().sent;
        assert_eq!(sent.len(), 3);
        assert_eq!(decode_write_value(&sent[0]).unwrap(), lookup("meter").unwrap());
        assert_eq!(
            decode_write_value(&sent[1]).unwrap(),
            lookup("meter_page3_vumeter").unwrap()
        );
        let contrast = decode_write_value(&sent[2]).unwrap();
        assert_eq!((contrast.module(), contrast.value()), (8, 5));
        assert_eq!(state, State {
            screen: Some(Screen::Vu),
            contrast: Some(5),
            identity_device: None,
        });
    }

    #[tokio::test]
    async fn identity_is_merged_into_state() {
        let config = config(0, 15);
        let mut state = State {
            contrast: Some(4),
            ..Default::default()
        };
        let reply = SysExCodec::default().wrap(CMD_IDENTIFY_REPLY, b"DEQ2496 V1.4\0");
        let mut s = session(vec![reply]);
        let identity = Dispatcher::new(&mut s, &config, &mut state)
            .query_identity()
            .await
            .unwrap();

        assert_eq!(identity, "DEQ2496 V1.4");
        assert_eq!(state.identity_device.as_deref(), Some("DEQ2496 V1.4"));
        assert_eq!(state.contrast, Some(4));
    }
}
