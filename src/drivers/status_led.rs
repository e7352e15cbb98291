use embedded_hal::digital::v2::OutputPin;

/// Optional activity LED.
///
/// Boards that can't spare the pin run with `None`; every call is then a no-op.
pub struct StatusLed<P> {
    pin: Option<P>,
    lit: bool,
}

impl<P: OutputPin> StatusLed<P> {
    pub fn new(pin: Option<P>) -> Self {
        Self { pin, lit: false }
    }

    pub fn disabled() -> Self {
        Self { pin: None, lit: false }
    }

    pub fn is_enabled(&self) -> bool {
        self.pin.is_some()
    }

    pub fn is_lit(&self) -> bool {
        self.lit
    }

    pub fn on(&mut self) -> Result<(), P::Error> {
        self.set(true)
    }

    pub fn off(&mut self) -> Result<(), P::Error> {
        self.set(false)
    }

    pub fn toggle(&mut self) -> Result<(), P::Error> {
        self.set(!self.lit)
    }

    fn set(&mut self, lit: bool) -> Result<(), P::Error> {
        if let Some(pin) = self.pin.as_mut() {
            if lit {
                pin.set_high()?;
            } else {
                pin.set_low()?;
            }
            self.lit = lit;
        }
        Ok(())
    }
}
