use utoipa::{
    Modify, OpenApi,
    openapi::{
        self,
        OpenApi as OpenApiSpec,
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    dto::{
        auth::{LoginRequest, LoginResponse, RegisterRequest},
        cart::{AddToCartRequest, CartItemDto, CartView, UpdateCartItemRequest},
        orders::{
            CancelOrderRequest, CreateOrderRequest, OrderDetail, OrderItemRequest, OrderList,
            OrderStatusCount, OrderSummary, ReturnOrderRequest, UpdateOrderPaymentRequest,
            UpdateOrderStatusRequest,
        },
        payments::{
            CreatePaymentRequest, PaymentDetail, PaymentList, PaymentMethodCount,
            PaymentStatusCount, PaymentSummary, RefundRequest, VerifyPaymentRequest,
        },
        products::{AdjustStockRequest, CreateProductRequest, ProductList, UpdateProductRequest},
        wishlist::{AddToWishlistRequest, WishlistList},
    },
    models::{
        Address, Order, OrderItem, OrderPaymentStatus, OrderStatus, Payment, PaymentMethod,
        PaymentState, Product, ProductStatus, RefundEntry, StatusHistoryEntry, User,
    },
    response::{ApiResponse, Meta},
    routes::{auth, cart, health, orders, params, payments, products, wishlist},
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        auth::register,
        auth::login,
        products::list_products,
        products::get_product,
        products::create_product,
        products::update_product,
        products::delete_product,
        products::list_low_stock,
        products::adjust_stock,
        cart::cart_list,
        cart::add_to_cart,
        cart::update_cart_item,
        cart::remove_from_cart,
        cart::clear_cart,
        wishlist::list_wishlist,
        wishlist::add_to_wishlist,
        wishlist::remove_from_wishlist,
        orders::create_order,
        orders::list_my_orders,
        orders::list_all_orders,
        orders::order_summary,
        orders::get_order,
        orders::update_status,
        orders::cancel_order,
        orders::return_order,
        orders::update_payment_status,
        orders::delete_order,
        payments::initiate_payment,
        payments::verify_payment,
        payments::webhook,
        payments::list_my_payments,
        payments::list_all_payments,
        payments::payment_summary,
        payments::get_payment,
        payments::refund_payment,
    ),
    components(
        schemas(
            User,
            Product,
            ProductStatus,
            Address,
            Order,
            OrderItem,
            OrderStatus,
            OrderPaymentStatus,
            StatusHistoryEntry,
            Payment,
            PaymentState,
            PaymentMethod,
            RefundEntry,
            RegisterRequest,
            LoginRequest,
            LoginResponse,
            CreateProductRequest,
            UpdateProductRequest,
            AdjustStockRequest,
            ProductList,
            AddToCartRequest,
            UpdateCartItemRequest,
            CartItemDto,
            CartView,
            AddToWishlistRequest,
            WishlistList,
            OrderItemRequest,
            CreateOrderRequest,
            UpdateOrderStatusRequest,
            CancelOrderRequest,
            ReturnOrderRequest,
            UpdateOrderPaymentRequest,
            OrderDetail,
            OrderList,
            OrderStatusCount,
            OrderSummary,
            CreatePaymentRequest,
            VerifyPaymentRequest,
            RefundRequest,
            PaymentDetail,
            PaymentList,
            PaymentStatusCount,
            PaymentMethodCount,
            PaymentSummary,
            params::Pagination,
            params::ProductQuery,
            params::OrderListQuery,
            params::PaymentListQuery,
            Meta,
            ApiResponse<Product>,
            ApiResponse<ProductList>,
            ApiResponse<CartView>,
            ApiResponse<WishlistList>,
            ApiResponse<OrderDetail>,
            ApiResponse<OrderList>,
            ApiResponse<OrderSummary>,
            ApiResponse<PaymentDetail>,
            ApiResponse<PaymentList>,
            ApiResponse<PaymentSummary>
        )
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Auth", description = "Authentication endpoints"),
        (name = "Products", description = "Product catalog endpoints"),
        (name = "Cart", description = "Cart endpoints"),
        (name = "Wishlist", description = "Wishlist endpoints"),
        (name = "Orders", description = "Order lifecycle endpoints"),
        (name = "Payments", description = "Payment and refund endpoints"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}
