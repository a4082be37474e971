use crate::{
    protocol::{is_valid_ftms_service, is_valid_heart_rate_service},
    types::DeviceDescriptor,
};

/// Lowercase name fragments used by common trainers and heart-rate straps
pub const FITNESS_KEYWORDS: [&str; 18] = [
    "trainer", "bike", "zwift", "wahoo", "tacx", "elite", "kickr", "neo", "flux", "direto",
    "cycleops", "kinetic", "heart", "hr", "polar", "garmin", "chest", "rhythm",
];

/// Decide whether a discovered device is a plausible fitness device
///
/// Checks, in order:
/// 1. Low-Energy capability (rejected outright without it)
/// 2. An advertised FTMS or Heart Rate service identifier
/// 3. A case-insensitive keyword match on the display name
///
/// This is an allow-list heuristic; devices with unusual names and no
/// advertised services are missed.
#[must_use]
pub fn is_fitness_device(device: &DeviceDescriptor) -> bool {
    if !device.low_energy {
        return false;
    }

    if device
        .services
        .iter()
        .any(|s| is_valid_ftms_service(s) || is_valid_heart_rate_service(s))
    {
        return true;
    }

    let name = device.name.to_lowercase();
    FITNESS_KEYWORDS.iter().any(|keyword| name.contains(keyword))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FTMS_SERVICE_UUID, HEART_RATE_SERVICE_UUID};

    #[test]
    fn test_rejects_classic_only_device() {
        let mut device = DeviceDescriptor::new("00:11:22:33:44:55", "Wahoo KICKR")
            .with_service(FTMS_SERVICE_UUID);
        device.low_energy = false;

        assert!(!is_fitness_device(&device));
    }

    #[test]
    fn test_accepts_by_service() {
        let trainer = DeviceDescriptor::new("00:11:22:33:44:55", "Unnamed")
            .with_service("00001800-0000-1000-8000-00805f9b34fb")
            .with_service(FTMS_SERVICE_UUID.to_uppercase());
        assert!(is_fitness_device(&trainer));

        let strap = DeviceDescriptor::new("00:11:22:33:44:66", "")
            .with_service(HEART_RATE_SERVICE_UUID);
        assert!(is_fitness_device(&strap));
    }

    #[test]
    fn test_accepts_by_name_keyword() {
        let names = ["TACX NEO 2T", "Polar H10 1234", "my bike", "KICKR CORE 5A1B"];
        for name in names {
            let device = DeviceDescriptor::new("00:11:22:33:44:55", name);
            assert!(is_fitness_device(&device), "{name} should be accepted");
        }
    }

    #[test]
    fn test_rejects_unrelated_device() {
        let names = ["Living Room TV", "", "Keyboard K380"];
        for name in names {
            let device = DeviceDescriptor::new("00:11:22:33:44:55", name)
                .with_service("0000180f-0000-1000-8000-00805f9b34fb");
            assert!(!is_fitness_device(&device), "{name} should be rejected");
        }
    }
}
