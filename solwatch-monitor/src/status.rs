use serde::Serialize;

/// Decoded label for the controller's 16-bit status register.
///
/// Decode order matters: the over-voltage-protection field and the fault bit
/// each short-circuit the charge-stage lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusLabel {
    Standby,
    Float,
    Boost,
    Equalize,
    /// Bits 14-15 == 01: input over-voltage protection tripped.
    OverVoltage,
    /// Bit 15 set: controller fault.
    Fault,
    /// No status code in the packet.
    Unknown,
}

impl StatusLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            StatusLabel::Standby => "Standby",
            StatusLabel::Float => "Float",
            StatusLabel::Boost => "Boost",
            StatusLabel::Equalize => "Equalize",
            StatusLabel::OverVoltage => "OVP",
            StatusLabel::Fault => "Fault",
            StatusLabel::Unknown => "-",
        }
    }
}

/// Decode the charge-stage label from a raw status register value.
///
/// Bits 2-3 carry the charge stage; bits 14-15 the input voltage state.
pub fn decode_status(code: Option<u16>) -> StatusLabel {
    let Some(code) = code else {
        return StatusLabel::Unknown;
    };
    let volt_state = (code >> 14) & 0x03;
    if volt_state == 1 {
        return StatusLabel::OverVoltage;
    }
    if code & 0x8000 != 0 {
        return StatusLabel::Fault;
    }
    match (code >> 2) & 0x03 {
        0 => StatusLabel::Standby,
        1 => StatusLabel::Float,
        2 => StatusLabel::Boost,
        _ => StatusLabel::Equalize,
    }
}

/// Battery chemistry code as reported in the parameter block.
pub fn battery_type_label(code: u8) -> &'static str {
    match code {
        0 => "User",
        1 => "Sealed",
        2 => "Gel",
        3 => "Flooded",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fault_bit_wins_over_stage_bits() {
        // 0x8000 has volt_state == 2, so it falls through OVP to the fault bit
        // regardless of what the stage bits say.
        assert_eq!(decode_status(Some(0x8000)), StatusLabel::Fault);
        assert_eq!(decode_status(Some(0x8000 | 0b0100)), StatusLabel::Fault);
    }

    #[test]
    fn ovp_is_checked_before_fault() {
        assert_eq!(decode_status(Some(0x4000)), StatusLabel::OverVoltage);
        // Stage bits don't matter once the volt-state field reads 01.
        assert_eq!(decode_status(Some(0x4000 | 0b1100)), StatusLabel::OverVoltage);
    }

    #[test]
    fn charge_stage_field() {
        assert_eq!(decode_status(Some(0b0000)), StatusLabel::Standby);
        assert_eq!(decode_status(Some(0b0100)), StatusLabel::Float);
        assert_eq!(decode_status(Some(0b1000)), StatusLabel::Boost);
        assert_eq!(decode_status(Some(0b1100)), StatusLabel::Equalize);
    }

    #[test]
    fn missing_code_is_unknown_not_a_panic() {
        assert_eq!(decode_status(None), StatusLabel::Unknown);
        assert_eq!(decode_status(None).as_str(), "-");
    }

    #[test]
    fn battery_codes() {
        assert_eq!(battery_type_label(0), "User");
        assert_eq!(battery_type_label(1), "Sealed");
        assert_eq!(battery_type_label(2), "Gel");
        assert_eq!(battery_type_label(3), "Flooded");
        assert_eq!(battery_type_label(9), "Unknown");
    }
}
