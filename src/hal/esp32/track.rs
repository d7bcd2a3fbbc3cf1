//! H-bridge enable line and current sense via ESP-IDF GPIO and ADC.

use esp_idf_hal::adc::attenuation::DB_11;
use esp_idf_hal::adc::oneshot::config::AdcChannelConfig;
use esp_idf_hal::adc::oneshot::{AdcChannelDriver, AdcDriver};
use esp_idf_hal::adc::ADC1;
use esp_idf_hal::gpio::{ADCPin, Output, OutputPin, PinDriver};
use esp_idf_hal::peripheral::Peripheral;
use esp_idf_hal::sys::EspError;
use tracing::warn;

use crate::traits::TrackHardware;

/// Monitored track output.
///
/// # Example
///
/// ```ignore
/// use esp_idf_hal::adc::oneshot::AdcDriver;
/// use esp_idf_hal::delay::Ets;
/// use rs_dccstation::hal::esp32::Esp32Track;
/// use rs_dccstation::power::PowerController;
/// use rs_dccstation::track::BoardType;
///
/// let peripherals = Peripherals::take()?;
/// let adc = AdcDriver::new(peripherals.adc1)?;
/// let ops = Esp32Track::new(&adc, peripherals.pins.gpio25, peripherals.pins.gpio36)?;
///
/// let mut power = PowerController::new(Ets, config.power.clone());
/// power.register(BoardType::Lmd18200, "OPS", false, ops);
/// ```
pub struct Esp32Track<'d, E: OutputPin, S: ADCPin<Adc = ADC1>> {
    enable: PinDriver<'d, E, Output>,
    sense: AdcChannelDriver<'d, S, &'d AdcDriver<'d, ADC1>>,
}

impl<'d, E: OutputPin, S: ADCPin<Adc = ADC1>> Esp32Track<'d, E, S> {
    /// Configures the enable pin (driven low) and the sense channel.
    ///
    /// # Errors
    ///
    /// Returns an error if GPIO or ADC channel initialization fails.
    pub fn new(
        adc: &'d AdcDriver<'d, ADC1>,
        enable_pin: impl Peripheral<P = E> + 'd,
        sense_pin: impl Peripheral<P = S> + 'd,
    ) -> Result<Self, EspError> {
        let mut enable = PinDriver::output(enable_pin)?;
        enable.set_low()?;

        let config = AdcChannelConfig {
            attenuation: DB_11,
            ..Default::default()
        };
        let sense = AdcChannelDriver::new(adc, sense_pin, &config)?;

        Ok(Self { enable, sense })
    }
}

impl<E: OutputPin, S: ADCPin<Adc = ADC1>> TrackHardware for Esp32Track<'_, E, S> {
    fn set_enable(&mut self, on: bool) {
        let result = if on {
            self.enable.set_high()
        } else {
            self.enable.set_low()
        };
        if let Err(e) = result {
            warn!("track enable write failed: {}", e);
        }
    }

    fn read_raw_current(&mut self) -> u16 {
        self.sense.read().unwrap_or(0)
    }
}

/// Track output without current sensing, for boards registered as
/// non-monitored.
pub struct Esp32EnableOutput<'d, E: OutputPin> {
    enable: PinDriver<'d, E, Output>,
}

impl<'d, E: OutputPin> Esp32EnableOutput<'d, E> {
    /// Configures the enable pin, driven low.
    pub fn new(enable_pin: impl Peripheral<P = E> + 'd) -> Result<Self, EspError> {
        let mut enable = PinDriver::output(enable_pin)?;
        enable.set_low()?;
        Ok(Self { enable })
    }
}

impl<E: OutputPin> TrackHardware for Esp32EnableOutput<'_, E> {
    fn set_enable(&mut self, on: bool) {
        let result = if on {
            self.enable.set_high()
        } else {
            self.enable.set_low()
        };
        if let Err(e) = result {
            warn!("track enable write failed: {}", e);
        }
    }

    fn read_raw_current(&mut self) -> u16 {
        0
    }
}
