use proptest::prelude::*;
use storefront_api::config::ShippingConfig;
use storefront_api::entities::order::DeliveryOption;
use storefront_api::services::quote::{
    clamp_quantity, pick_shipping_fee, MAX_LINE_QUANTITY, MIN_LINE_QUANTITY,
};

proptest! {
    #[test]
    fn clamped_quantity_is_always_orderable(requested in any::<Option<i32>>()) {
        let quantity = clamp_quantity(requested);
        prop_assert!(quantity >= MIN_LINE_QUANTITY);
        prop_assert!(quantity <= MAX_LINE_QUANTITY);
    }

    #[test]
    fn in_range_quantities_pass_through_unchanged(requested in MIN_LINE_QUANTITY..=MAX_LINE_QUANTITY) {
        prop_assert_eq!(clamp_quantity(Some(requested)), requested);
    }

    #[test]
    fn shipping_is_free_exactly_at_and_above_the_threshold(subtotal in 0i64..1_000_000) {
        let shipping = ShippingConfig::default();
        for option in [DeliveryOption::Standard, DeliveryOption::Express] {
            let fee = pick_shipping_fee(subtotal, option, &shipping);
            if subtotal >= shipping.free_shipping_threshold {
                prop_assert_eq!(fee, 0);
            } else {
                let expected = match option {
                    DeliveryOption::Express => shipping.express_fee,
                    DeliveryOption::Standard => shipping.standard_fee,
                };
                prop_assert_eq!(fee, expected);
            }
        }
    }

    #[test]
    fn express_never_undercuts_standard(subtotal in 0i64..1_000_000) {
        let shipping = ShippingConfig::default();
        let standard = pick_shipping_fee(subtotal, DeliveryOption::Standard, &shipping);
        let express = pick_shipping_fee(subtotal, DeliveryOption::Express, &shipping);
        prop_assert!(express >= standard);
    }
}
