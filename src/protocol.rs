//! Vantage wire protocol definitions and command encoding
//!
//! Commands on the control connection are single ASCII lines of the form
//! `<VERB> <args...>\n`. The encoders here are pure: they render a typed
//! intent into the exact text the controller expects and nothing else.

/// Ramp type code used for dim transitions
pub const LOAD_RAMP_TYPE: u32 = 6;

/// Default dim transition time, tenths of a second
pub const DEFAULT_RAMP_TIME: u32 = 1;

/// Default HSL dissolve transition time
pub const DEFAULT_DISSOLVE_TIME: u32 = 500;

/// Object methods invoked over the control connection
pub mod methods {
    pub const LOAD_RAMP: &str = "Load.Ramp";
    pub const LOAD_SET_LEVEL: &str = "Load.SetLevel";
    pub const RGB_LOAD_DISSOLVE_HSL: &str = "RGBLoad.DissolveHSL";
    pub const THERMOSTAT_GET_OUTDOOR_TEMPERATURE: &str = "Thermostat.GetOutdoorTemperature";
    pub const THERMOSTAT_SET_OUTDOOR_TEMPERATURE_SW: &str = "Thermostat.SetOutdoorTemperatureSW";
    pub const THERMOSTAT_SET_INDOOR_TEMPERATURE_SW: &str = "Thermostat.SetIndoorTemperatureSW";
    pub const OBJECT_IS_INTERFACE_SUPPORTED: &str = "Object.IsInterfaceSupported";
}

/// Event-log categories enabled during session bootstrap
pub const EVENT_LOG_CATEGORIES: &[&str] = &["AUTOMATION", "EVENT", "STATUS", "STATUSEX", "SYSTEM"];

/// Interface names the accessory layer negotiates for
pub mod interfaces {
    pub const LOAD: &str = "Load";
    pub const THERMOSTAT: &str = "Thermostat";
}

/// Request the current status of a single load.
pub fn get_load_status(vid: u32) -> String {
    format!("GETLOAD {}\n", vid)
}

/// Set a load's dim level (0-100).
///
/// A non-zero level uses the ramp form with the given transition time in
/// tenths of a second; level zero is a direct level set, never a ramp.
pub fn set_dim_level(vid: u32, level: u32, time: Option<u32>) -> String {
    if level > 0 {
        let time = time.unwrap_or(DEFAULT_RAMP_TIME);
        format!(
            "INVOKE {} {} {} {} {}\n",
            vid,
            methods::LOAD_RAMP,
            LOAD_RAMP_TYPE,
            time,
            level
        )
    } else {
        format!("INVOKE {} {} 0\n", vid, methods::LOAD_SET_LEVEL)
    }
}

/// Dissolve an RGB load to an HSL color.
///
/// Hue and saturation pass through; luminance is scaled to the controller's
/// x1000 units.
pub fn dissolve_hsl(vid: u32, hue: f64, saturation: f64, luminance: f64, time: Option<u32>) -> String {
    let time = time.unwrap_or(DEFAULT_DISSOLVE_TIME);
    format!(
        "INVOKE {} {} {} {} {} {}\n",
        vid,
        methods::RGB_LOAD_DISSOLVE_HSL,
        hue,
        saturation,
        (luminance * 1000.0) as u32,
        time
    )
}

/// Query the outdoor temperature from a thermostat object.
pub fn get_outdoor_temperature(vid: u32) -> String {
    format!(
        "INVOKE {} {}\n",
        vid,
        methods::THERMOSTAT_GET_OUTDOOR_TEMPERATURE
    )
}

/// Ask whether an object supports a given interface id.
pub fn is_interface_supported(vid: u32, interface_id: u32) -> String {
    format!(
        "INVOKE {} {} {}\n",
        vid,
        methods::OBJECT_IS_INTERFACE_SUPPORTED,
        interface_id
    )
}

/// Commands sent once, immediately after the control connection is
/// established.
///
/// The status snapshot primes current state; the ELENABLE/ELLOG directives
/// switch the controller into a mode that streams unsolicited state-change
/// lines, which the command-stream parser depends on.
pub fn session_bootstrap() -> Vec<String> {
    let mut commands = vec!["STATUS ALL\n".to_string()];
    for category in EVENT_LOG_CATEGORIES {
        commands.push(format!("ELENABLE 1 {} ON\n", category));
    }
    for category in EVENT_LOG_CATEGORIES {
        commands.push(format!("ELLOG {} ON\n", category));
    }
    commands
}

/// Configuration-port request for the interface listing.
pub fn get_interfaces() -> &'static str {
    "<IIntrospection><GetInterfaces><call></call></GetInterfaces></IIntrospection>\n"
}

/// Configuration-port request for the project database file.
pub fn download_configuration() -> &'static str {
    "<IBackup><GetFile><call>Backup\\Project.dc</call></GetFile></IBackup>\n"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_load_status() {
        assert_eq!(get_load_status(2774), "GETLOAD 2774\n");
    }

    #[test]
    fn test_dim_level_zero_never_ramps() {
        assert_eq!(set_dim_level(2774, 0, None), "INVOKE 2774 Load.SetLevel 0\n");
        // Explicit time on a zero level still uses the direct form.
        assert_eq!(
            set_dim_level(2774, 0, Some(10)),
            "INVOKE 2774 Load.SetLevel 0\n"
        );
    }

    #[test]
    fn test_dim_level_positive_always_ramps() {
        assert_eq!(
            set_dim_level(2774, 75, None),
            "INVOKE 2774 Load.Ramp 6 1 75\n"
        );
        assert_eq!(
            set_dim_level(2774, 75, Some(20)),
            "INVOKE 2774 Load.Ramp 6 20 75\n"
        );
        assert_eq!(set_dim_level(2774, 1, None), "INVOKE 2774 Load.Ramp 6 1 1\n");
    }

    #[test]
    fn test_dissolve_hsl_scales_luminance() {
        assert_eq!(
            dissolve_hsl(2774, 120.0, 50.0, 80.0, None),
            "INVOKE 2774 RGBLoad.DissolveHSL 120 50 80000 500\n"
        );
        assert_eq!(
            dissolve_hsl(2774, 0.0, 0.0, 100.0, Some(250)),
            "INVOKE 2774 RGBLoad.DissolveHSL 0 0 100000 250\n"
        );
    }

    #[test]
    fn test_interface_support_query() {
        assert_eq!(
            is_interface_supported(2774, 32),
            "INVOKE 2774 Object.IsInterfaceSupported 32\n"
        );
    }

    #[test]
    fn test_outdoor_temperature_query() {
        assert_eq!(
            get_outdoor_temperature(214),
            "INVOKE 214 Thermostat.GetOutdoorTemperature\n"
        );
    }

    #[test]
    fn test_session_bootstrap_shape() {
        let commands = session_bootstrap();
        assert_eq!(commands.len(), 11);
        assert_eq!(commands[0], "STATUS ALL\n");
        assert_eq!(commands[1], "ELENABLE 1 AUTOMATION ON\n");
        assert_eq!(commands[6], "ELLOG AUTOMATION ON\n");
        assert!(commands.iter().all(|c| c.ends_with('\n')));
        assert_eq!(
            commands.iter().filter(|c| c.starts_with("ELENABLE")).count(),
            5
        );
        assert_eq!(commands.iter().filter(|c| c.starts_with("ELLOG")).count(), 5);
    }

    #[test]
    fn test_configuration_requests() {
        assert_eq!(
            get_interfaces(),
            "<IIntrospection><GetInterfaces><call></call></GetInterfaces></IIntrospection>\n"
        );
        assert_eq!(
            download_configuration(),
            "<IBackup><GetFile><call>Backup\\Project.dc</call></GetFile></IBackup>\n"
        );
    }
}
